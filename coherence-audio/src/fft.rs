use std::sync::Arc;

use num_complex::Complex;
use num_traits::Zero;
use rustfft::{FFTplanner, FFT};

/// Forward and inverse plans of one size plus the scratch space to run them without allocating.
pub struct FftTransformer {
    forward: Arc<dyn FFT<f64>>,
    inverse: Arc<dyn FFT<f64>>,
    size: usize,
    scratch: Vec<Complex<f64>>,
}

impl FftTransformer {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "size must be greater than 0");
        Self {
            forward: FFTplanner::new(false).plan_fft(size),
            inverse: FFTplanner::new(true).plan_fft(size),
            size,
            scratch: vec![Complex::zero(); size],
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn forward_real(&mut self, input: &[f32], output: &mut [Complex<f64>]) {
        assert!(input.len() == self.size, "input must match the FFT size");
        for (dst, &src) in self.scratch.iter_mut().zip(input.iter()) {
            *dst = Complex::new(src as f64, 0.0);
        }
        self.forward.process(&mut self.scratch, output);
    }

    /// Forward transform. `input` is used as scratch and left unspecified.
    pub fn forward(&self, input: &mut [Complex<f64>], output: &mut [Complex<f64>]) {
        self.forward.process(input, output);
    }

    /// Unnormalized inverse transform: the result is `size` times the true inverse. `input` is
    /// used as scratch and left unspecified.
    pub fn inverse(&self, input: &mut [Complex<f64>], output: &mut [Complex<f64>]) {
        self.inverse.process(input, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_round_trips_up_to_scale() {
        let mut fft = FftTransformer::new(12);
        let signal: Vec<f32> = (0..12).map(|i| (i as f32 * 0.7).sin()).collect();
        let mut spectrum = vec![Complex::zero(); 12];
        let mut restored = vec![Complex::zero(); 12];
        fft.forward_real(&signal, &mut spectrum);
        fft.inverse(&mut spectrum, &mut restored);
        for (orig, back) in signal.iter().zip(restored.iter()) {
            assert!((back.re / 12.0 - *orig as f64).abs() < 1e-9);
            assert!(back.im.abs() < 1e-9);
        }
    }

    #[test]
    fn it_puts_a_tone_in_its_bin() {
        let mut fft = FftTransformer::new(64);
        let signal: Vec<f32> = (0..64)
            .map(|i| (2.0 * std::f32::consts::PI * 5.0 * i as f32 / 64.0).cos())
            .collect();
        let mut spectrum = vec![Complex::zero(); 64];
        fft.forward_real(&signal, &mut spectrum);
        assert!((spectrum[5].norm() - 32.0).abs() < 1e-3);
        assert!((spectrum[59].norm() - 32.0).abs() < 1e-3);
        assert!(spectrum[6].norm() < 1e-3);
    }
}
