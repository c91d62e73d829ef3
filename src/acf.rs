// FFT-based autocorrelation functions for eigenimages and eigenvectors.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// 2D autocorrelation of an image: forward FFT, conjugate product of the
/// mean-removed spectra, inverse FFT, real part, centre-shifted so the zero
/// lag sits at `(ny / 2, nx / 2)`.
pub fn autocorr_image(image: ArrayView2<'_, f64>) -> Array2<f64> {
    let (ny, nx) = image.dim();
    let n = (ny * nx) as f64;

    let mut buf: Vec<Complex<f64>> = image.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft2_in_place(&mut buf, ny, nx, false);

    let mean = buf.iter().sum::<Complex<f64>>() / n;
    for v in buf.iter_mut() {
        let centered = *v - mean;
        *v = centered * centered.conj();
    }

    fft2_in_place(&mut buf, ny, nx, true);

    // Unnormalized transforms: one inverse pass needs a 1/N to match the
    // conventional ACF scale.
    let mut acf = Array2::<f64>::zeros((ny, nx));
    for (idx, v) in buf.iter().enumerate() {
        acf[[idx / nx, idx % nx]] = v.re / n;
    }
    fftshift2(&acf)
}

/// 1D autocorrelation of a vector, zero lag at index 0 (not shifted; the
/// spectral width estimators walk outward from the first element).
pub fn autocorr_vector(vector: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = vector.len();
    let mut planner = FftPlanner::<f64>::new();
    let fwd = planner.plan_fft_forward(n);
    let inv = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = vector.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fwd.process(&mut buf);

    let mean = buf.iter().sum::<Complex<f64>>() / n as f64;
    for v in buf.iter_mut() {
        let centered = *v - mean;
        *v = centered * centered.conj();
    }

    inv.process(&mut buf);
    Array1::from_iter(buf.into_iter().map(|v| v.re / n as f64))
}

/// Row-column 2D FFT over a row-major buffer.
fn fft2_in_place(buf: &mut [Complex<f64>], ny: usize, nx: usize, inverse: bool) {
    let mut planner = FftPlanner::<f64>::new();
    let fft_rows = if inverse {
        planner.plan_fft_inverse(nx)
    } else {
        planner.plan_fft_forward(nx)
    };
    let fft_cols = if inverse {
        planner.plan_fft_inverse(ny)
    } else {
        planner.plan_fft_forward(ny)
    };

    for row in buf.chunks_exact_mut(nx) {
        fft_rows.process(row);
    }

    let mut column = vec![Complex::new(0.0, 0.0); ny];
    for x in 0..nx {
        for y in 0..ny {
            column[y] = buf[y * nx + x];
        }
        fft_cols.process(&mut column);
        for y in 0..ny {
            buf[y * nx + x] = column[y];
        }
    }
}

/// Shift the zero-lag sample of a 2D transform to the array centre.
pub fn fftshift2(acf: &Array2<f64>) -> Array2<f64> {
    let (ny, nx) = acf.dim();
    let (sy, sx) = (ny / 2, nx / 2);
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        acf[[(y + ny - sy) % ny, (x + nx - sx) % nx]]
    })
}
