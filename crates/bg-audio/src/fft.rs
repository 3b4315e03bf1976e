use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// Taper applied to each frame before the transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Taper {
    /// No taper.
    Rectangular,
    /// Symmetric Hamming: `0.54 - 0.46 cos(2πn/(N-1))`.
    Hamming,
    /// Symmetric Hann: `0.5 - 0.5 cos(2πn/(N-1))`.
    Hann,
}

impl Taper {
    /// Coefficients of this taper for a window of `size` samples.
    ///
    /// # Example
    /// ```
    /// use bg_audio::fft::Taper;
    /// let w = Taper::Hann.coefficients(5);
    /// assert_eq!(w.len(), 5);
    /// assert!(w[0].abs() < 1e-6 && (w[2] - 1.0).abs() < 1e-6);
    /// ```
    #[must_use]
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        if size == 1 {
            return vec![1.0];
        }
        let denom = size as f32 - 1.0;
        (0..size)
            .map(|i| {
                let c = (2.0 * std::f32::consts::PI * i as f32 / denom).cos();
                match self {
                    Self::Rectangular => 1.0,
                    Self::Hamming => 0.54 - 0.46 * c,
                    Self::Hann => 0.5 - 0.5 * c,
                }
            })
            .collect()
    }
}

/// FFT pipeline: tapered real FFT using realfft.
///
/// Pre-allocates the FFT plan and scratch buffers for zero-allocation hot path.
///
/// # Example
/// ```
/// use bg_audio::fft::{FftPipeline, Taper};
/// let fft = FftPipeline::new(1024, Taper::Hamming);
/// assert_eq!(fft.bins(), 513);
/// ```
pub struct FftPipeline {
    fft_size: usize,
    input_buf: Vec<f32>,
    spectrum_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

impl FftPipeline {
    /// Create a new FFT pipeline with the given window size and taper.
    ///
    /// # Panics
    /// Panics if `size` is 0.
    #[must_use]
    pub fn new(size: usize, taper: Taper) -> Self {
        assert!(size > 0, "FFT size must be > 0");

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Self {
            fft_size: size,
            input_buf,
            spectrum_buf,
            scratch,
            plan,
            window: taper.coefficients(size),
        }
    }

    /// Magnitude spectrum of `frame` written into `out` (`bins()` values).
    ///
    /// `frame` is zero-padded or truncated to the FFT size. A failed transform
    /// yields a silent spectrum.
    ///
    /// # Example
    /// ```
    /// use bg_audio::fft::{FftPipeline, Taper};
    /// let mut fft = FftPipeline::new(256, Taper::Rectangular);
    /// let mut out = vec![0.0; fft.bins()];
    /// fft.magnitudes_into(&[1.0; 256], &mut out);
    /// assert!((out[0] - 256.0).abs() < 1e-3);
    /// ```
    pub fn magnitudes_into(&mut self, frame: &[f32], out: &mut [f32]) {
        let n = self.fft_size.min(frame.len());

        for (i, slot) in self.input_buf.iter_mut().enumerate() {
            *slot = if i < n { frame[i] * self.window[i] } else { 0.0 };
        }

        if let Err(e) = self.plan.process_with_scratch(
            &mut self.input_buf,
            &mut self.spectrum_buf,
            &mut self.scratch,
        ) {
            log::warn!("FFT échouée, spectre nul : {e}");
            out.fill(0.0);
            return;
        }

        for (slot, c) in out.iter_mut().zip(self.spectrum_buf.iter()) {
            *slot = c.norm();
        }
    }

    /// Allocating variant of [`FftPipeline::magnitudes_into`].
    pub fn magnitudes(&mut self, frame: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; self.bins()];
        self.magnitudes_into(frame, &mut out);
        out
    }

    /// FFT window size.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins (N/2+1).
    #[must_use]
    pub fn bins(&self) -> usize {
        self.spectrum_buf.len()
    }
}

/// Linear autocorrelation through the FFT: `IFFT(|FFT(x)|²)`.
///
/// The input is zero-padded to at least twice its length so the circular
/// product carries no wrap-around. Only non-negative lags are returned, one per
/// input sample.
pub struct Autocorrelator {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    time_buf: Vec<f32>,
    spectrum_buf: Vec<Complex<f32>>,
    scratch_fwd: Vec<Complex<f32>>,
    scratch_inv: Vec<Complex<f32>>,
}

impl Autocorrelator {
    /// Plan transforms for windows of `len` samples.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let padded = (2 * len.max(1)).next_power_of_two();
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(padded);
        let inverse = planner.plan_fft_inverse(padded);
        Self {
            len,
            time_buf: forward.make_input_vec(),
            spectrum_buf: forward.make_output_vec(),
            scratch_fwd: forward.make_scratch_vec(),
            scratch_inv: inverse.make_scratch_vec(),
            forward,
            inverse,
        }
    }

    /// Autocorrelation of `window` for lags `0..len`, written into `out`.
    ///
    /// Values carry the transform's `N` scale factor; callers normalize.
    ///
    /// # Example
    /// ```
    /// use bg_audio::fft::Autocorrelator;
    /// let mut ac = Autocorrelator::new(4);
    /// let mut out = vec![0.0; 4];
    /// ac.process(&[1.0, 0.0, 1.0, 0.0], &mut out);
    /// assert!(out[1].abs() < 1e-3 && (out[2] / out[0] - 0.5).abs() < 1e-3);
    /// ```
    pub fn process(&mut self, window: &[f32], out: &mut [f32]) {
        let n = self.len.min(window.len());
        self.time_buf.fill(0.0);
        self.time_buf[..n].copy_from_slice(&window[..n]);

        if let Err(e) = self.forward.process_with_scratch(
            &mut self.time_buf,
            &mut self.spectrum_buf,
            &mut self.scratch_fwd,
        ) {
            log::warn!("FFT directe échouée : {e}");
            out.fill(0.0);
            return;
        }

        for c in &mut self.spectrum_buf {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }

        if let Err(e) = self.inverse.process_with_scratch(
            &mut self.spectrum_buf,
            &mut self.time_buf,
            &mut self.scratch_inv,
        ) {
            log::warn!("FFT inverse échouée : {e}");
            out.fill(0.0);
            return;
        }

        for (slot, &v) in out.iter_mut().zip(self.time_buf.iter().take(self.len)) {
            *slot = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_endpoints_and_peak() {
        let w = Taper::Hamming.coefficients(1024);
        assert!((w[0] - 0.08).abs() < 1e-5);
        assert!((w[1023] - 0.08).abs() < 1e-5);
        assert!(w.iter().all(|&c| c <= 1.0 + 1e-6));
    }

    #[test]
    fn short_frames_are_zero_padded() {
        let mut fft = FftPipeline::new(64, Taper::Rectangular);
        let spectrum = fft.magnitudes(&[1.0; 8]);
        assert_eq!(spectrum.len(), 33);
        assert!((spectrum[0] - 8.0).abs() < 1e-4);
    }

    #[test]
    fn autocorrelation_matches_direct_sum() {
        let x: Vec<f32> = (0..50).map(|i| ((i * 7 % 11) as f32) - 5.0).collect();
        let mut ac = Autocorrelator::new(x.len());
        let mut fast = vec![0.0; x.len()];
        ac.process(&x, &mut fast);

        let scale = fast[0] / x.iter().map(|v| v * v).sum::<f32>();
        for lag in [1usize, 5, 17, 49] {
            let direct: f32 = (0..x.len() - lag).map(|i| x[i] * x[i + lag]).sum();
            assert!(
                (fast[lag] / scale - direct).abs() < 1e-2 * direct.abs().max(1.0),
                "lag {lag}: {} vs {direct}",
                fast[lag] / scale
            );
        }
    }
}
