//! Cumulative wavelet time-frequency representation.
//!
//! Each channel's segment is convolved with a bank of Hann-tapered complex exponentials, one per
//! frequency of interest, and sampled at a grid of times of interest that stays half a window
//! away from both segment edges. Power and cross-spectra are accumulated across segments, which
//! is what gives the magnitude-squared coherence estimate its meaning.

use std::f64::consts::PI;

use num_complex::Complex;
use num_traits::Zero;

use crate::accumulator::{ComplexAccumulator, RealAccumulator};
use crate::fft::FftTransformer;
use crate::math::{centered_hann, wrapped_offset};
use crate::running_stat::RunningStat;

// Guards floor() against step sizes that are not exact in binary, such as 2.0 / 0.1.
const COUNT_EPSILON: f64 = 1e-9;

/// Sizes derived from the analysis configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TfrDimensions {
    pub sample_rate: f64,
    pub window_len: f64,
    pub step_len: f64,
    pub freq_start: f64,
    pub freq_step: f64,
    pub n_freqs: usize,
    pub n_times: usize,
    // Samples per segment, which is also the FFT length.
    pub nfft: usize,
    // Samples per wavelet window; may be fractional.
    pub n_window: f64,
}

impl TfrDimensions {
    pub fn new(
        sample_rate: f64,
        segment_len: f64,
        window_len: f64,
        step_len: f64,
        freq_start: f64,
        freq_end: f64,
        freq_step: f64,
    ) -> Self {
        let n_freqs = ((freq_end - freq_start) / freq_step + COUNT_EPSILON).floor() as usize + 1;
        let n_times = ((segment_len - window_len) / step_len + COUNT_EPSILON).floor() as usize + 1;
        Self {
            sample_rate,
            window_len,
            step_len,
            freq_start,
            freq_step,
            n_freqs,
            n_times,
            nfft: (segment_len * sample_rate).round() as usize,
            n_window: window_len * sample_rate,
        }
    }

    pub fn frequency(&self, freq: usize) -> f64 {
        self.freq_start + freq as f64 * self.freq_step
    }

    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.n_freqs).map(|f| self.frequency(f)).collect()
    }

    /// Sample index of time of interest `t`, half a window in from the segment start.
    pub fn time_index(&self, t: usize) -> usize {
        ((t as f64 * self.step_len + self.window_len / 2.0) * self.sample_rate).round() as usize
    }
}

#[inline(always)]
fn cell_index(dims: &TfrDimensions, row: usize, freq: usize, t: usize) -> usize {
    (row * dims.n_freqs + freq) * dims.n_times + t
}

fn single_coherence(pxx: f64, pyy: f64, pxy: Complex<f64>) -> f64 {
    let coherence = pxy.norm_sqr() / (pxx * pyy);
    // Bounded by 1 analytically; only rounding can push it over. NaN passes through.
    if coherence > 1.0 {
        1.0
    } else {
        coherence
    }
}

pub struct CumulativeTfr {
    dims: TfrDimensions,
    n_channels: usize,
    n_pairs: usize,
    fft: FftTransformer,
    time_indices: Vec<usize>,
    // n_freqs x nfft, frequency domain
    wavelets: Vec<Vec<Complex<f64>>>,
    segment_spectrum: Vec<Complex<f64>>,
    product: Vec<Complex<f64>>,
    convolution: Vec<Complex<f64>>,
    // n_channels x n_freqs x n_times, latest trial only
    spectrum: Vec<Complex<f64>>,
    // n_channels x n_freqs x n_times
    power: Vec<RealAccumulator>,
    // n_pairs x n_freqs x n_times
    cross: Vec<ComplexAccumulator>,
}

impl CumulativeTfr {
    pub fn new(n_channels: usize, n_pairs: usize, dims: TfrDimensions, alpha: f64) -> Self {
        assert!(dims.n_times > 0, "need at least one time of interest");
        assert!(
            dims.time_index(dims.n_times - 1) < dims.nfft,
            "times of interest must fall inside the segment"
        );
        let channel_cells = n_channels * dims.n_freqs * dims.n_times;
        let pair_cells = n_pairs * dims.n_freqs * dims.n_times;
        let mut tfr = Self {
            dims,
            n_channels,
            n_pairs,
            fft: FftTransformer::new(dims.nfft),
            time_indices: (0..dims.n_times).map(|t| dims.time_index(t)).collect(),
            wavelets: vec![vec![Complex::zero(); dims.nfft]; dims.n_freqs],
            segment_spectrum: vec![Complex::zero(); dims.nfft],
            product: vec![Complex::zero(); dims.nfft],
            convolution: vec![Complex::zero(); dims.nfft],
            spectrum: vec![Complex::zero(); channel_cells],
            power: vec![RealAccumulator::new(alpha); channel_cells],
            cross: vec![ComplexAccumulator::new(alpha); pair_cells],
        };
        tfr.generate_wavelets();
        tfr
    }

    pub fn dims(&self) -> &TfrDimensions {
        &self.dims
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.dims.frequencies()
    }

    /// Drops everything accumulated so far. The wavelet bank is kept.
    pub fn reset(&mut self) {
        for acc in self.power.iter_mut() {
            acc.reset();
        }
        for acc in self.cross.iter_mut() {
            acc.reset();
        }
        for value in self.spectrum.iter_mut() {
            *value = Complex::zero();
        }
    }

    fn generate_wavelets(&mut self) {
        let nfft = self.dims.nfft;
        let n_window = self.dims.n_window;
        let sample_rate = self.dims.sample_rate;

        for freq in 0..self.dims.n_freqs {
            let omega = 2.0 * PI * self.dims.frequency(freq) / sample_rate;
            for (position, value) in self.product.iter_mut().enumerate() {
                // Zero-phase kernel: the tail of the buffer holds negative offsets.
                let offset = wrapped_offset(position, nfft);
                let taper = centered_hann(offset, n_window);
                let phase = omega * offset;
                *value = Complex::new(taper * phase.cos(), taper * phase.sin());
            }
            self.fft.forward(&mut self.product, &mut self.wavelets[freq]);
        }
    }

    /// Convolves one channel's segment with every wavelet and accumulates its power at each time
    /// of interest.
    pub fn add_trial(&mut self, segment: &[f32], channel: usize) {
        assert!(channel < self.n_channels, "channel out of range");
        assert!(segment.len() == self.fft.len(), "segment must span nfft samples");

        self.fft.forward_real(segment, &mut self.segment_spectrum);

        let scale = (2.0 / self.dims.n_window).sqrt() / self.dims.nfft as f64;
        for freq in 0..self.dims.n_freqs {
            for ((dst, &s), &w) in self
                .product
                .iter_mut()
                .zip(self.segment_spectrum.iter())
                .zip(self.wavelets[freq].iter())
            {
                *dst = s * w;
            }
            self.fft.inverse(&mut self.product, &mut self.convolution);

            for (t, &sample) in self.time_indices.iter().enumerate() {
                let value = self.convolution[sample] * scale;
                let cell = cell_index(&self.dims, channel, freq, t);
                self.spectrum[cell] = value;
                self.power[cell].add_value(value.norm_sqr());
            }
        }
    }

    /// Accumulates the latest cross-spectrum of `chan_x` and `chan_y` into `pair` and writes the
    /// coherence at each frequency, averaged over times of interest, into `mean_out`.
    ///
    /// Must be called once per trial and pair, after `add_trial` for both channels. Frequencies
    /// where either channel has no power yet come out as NaN.
    pub fn mean_coherence(&mut self, chan_x: usize, chan_y: usize, mean_out: &mut [f64], pair: usize) {
        self.accumulate_coherence(chan_x, chan_y, pair, mean_out, None);
    }

    /// Same as `mean_coherence`, also writing the standard deviation across times of interest.
    pub fn mean_coherence_with_stdev(
        &mut self,
        chan_x: usize,
        chan_y: usize,
        mean_out: &mut [f64],
        stdev_out: &mut [f64],
        pair: usize,
    ) {
        self.accumulate_coherence(chan_x, chan_y, pair, mean_out, Some(stdev_out));
    }

    fn accumulate_coherence(
        &mut self,
        chan_x: usize,
        chan_y: usize,
        pair: usize,
        mean_out: &mut [f64],
        mut stdev_out: Option<&mut [f64]>,
    ) {
        assert!(chan_x < self.n_channels, "chan_x out of range");
        assert!(chan_y < self.n_channels, "chan_y out of range");
        assert!(pair < self.n_pairs, "pair out of range");
        assert!(mean_out.len() >= self.dims.n_freqs, "mean_out too short");
        if let Some(stdev) = &stdev_out {
            assert!(stdev.len() >= self.dims.n_freqs, "stdev_out too short");
        }

        let dims = self.dims;
        for freq in 0..dims.n_freqs {
            let mut coherence = RunningStat::new();
            for t in 0..dims.n_times {
                let x = cell_index(&dims, chan_x, freq, t);
                let y = cell_index(&dims, chan_y, freq, t);
                let xy = cell_index(&dims, pair, freq, t);

                let crss = self.spectrum[x] * self.spectrum[y].conj();
                self.cross[xy].add_value(crss);

                coherence.push(single_coherence(
                    self.power[x].average(),
                    self.power[y].average(),
                    self.cross[xy].average(),
                ));
            }
            mean_out[freq] = coherence.cur_mean();
            if let Some(stdev) = stdev_out.as_mut() {
                stdev[freq] = coherence.cur_stdev();
            }
        }
    }

    /// Accumulated power per channel and frequency, averaged over times of interest.
    pub fn power_for_channels(&self) -> Vec<Vec<f32>> {
        (0..self.n_channels)
            .map(|channel| {
                (0..self.dims.n_freqs)
                    .map(|freq| self.mean_power(channel, freq) as f32)
                    .collect()
            })
            .collect()
    }

    /// Same as `power_for_channels`, writing into preallocated rows.
    pub fn power_for_channels_into(&self, out: &mut [Vec<f64>]) {
        assert!(out.len() >= self.n_channels, "not enough output rows");
        for (channel, row) in out.iter_mut().take(self.n_channels).enumerate() {
            assert!(row.len() >= self.dims.n_freqs, "output row too short");
            for (freq, value) in row.iter_mut().take(self.dims.n_freqs).enumerate() {
                *value = self.mean_power(channel, freq);
            }
        }
    }

    fn mean_power(&self, channel: usize, freq: usize) -> f64 {
        let start = cell_index(&self.dims, channel, freq, 0);
        let total: f64 = self.power[start..start + self.dims.n_times]
            .iter()
            .map(|acc| acc.average())
            .sum();
        total / self.dims.n_times as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FS: f64 = 1000.0;

    fn scenario_dims() -> TfrDimensions {
        TfrDimensions::new(FS, 4.0, 2.0, 0.1, 1.0, 40.0, 1.0)
    }

    fn sine(freq: f64, phase: f64, start: usize, len: usize) -> Vec<f32> {
        (start..start + len)
            .map(|i| (2.0 * PI * freq * i as f64 / FS + phase).sin() as f32)
            .collect()
    }

    fn noisy(signal: &[f32], rng: &mut StdRng, amplitude: f32) -> Vec<f32> {
        signal
            .iter()
            .map(|&s| s + amplitude * (rng.gen::<f32>() * 2.0 - 1.0))
            .collect()
    }

    fn argmax(values: &[f32]) -> usize {
        let mut best = 0;
        for (i, &v) in values.iter().enumerate() {
            if v > values[best] {
                best = i;
            }
        }
        best
    }

    #[test]
    fn it_derives_dimensions() {
        let dims = scenario_dims();
        assert_eq!(dims.n_freqs, 40);
        assert_eq!(dims.n_times, 21);
        assert_eq!(dims.nfft, 4000);
        assert_eq!(dims.n_window, 2000.0);
        assert_eq!(dims.time_index(0), 1000);
        assert_eq!(dims.time_index(3), 1300);
        assert_eq!(dims.time_index(20), 3000);
        assert_eq!(dims.frequency(9), 10.0);

        let fine = TfrDimensions::new(FS, 4.0, 2.0, 0.1, 1.0, 40.0, 0.25);
        assert_eq!(fine.n_freqs, 157);
    }

    #[test]
    fn it_peaks_at_the_input_frequency() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(1, 0, dims, 0.0);
        tfr.add_trial(&sine(10.0, 0.0, 0, dims.nfft), 0);

        let power = tfr.power_for_channels();
        assert_eq!(power.len(), 1);
        assert_eq!(power[0].len(), 40);
        assert_eq!(argmax(&power[0]), 9);
        // The 2 s Hann window has its first spectral zero 1 Hz away.
        assert!(power[0][8] < power[0][9] * 1e-3);
        assert!(power[0][10] < power[0][9] * 1e-3);
    }

    #[test]
    fn it_finds_a_tone_off_the_first_bin() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(1, 0, dims, 0.0);
        tfr.add_trial(&sine(23.0, 0.4, 0, dims.nfft), 0);
        assert_eq!(argmax(&tfr.power_for_channels()[0]), 22);
    }

    #[test]
    fn it_fills_preallocated_power_rows() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(2, 0, dims, 0.0);
        tfr.add_trial(&sine(5.0, 0.0, 0, dims.nfft), 0);
        tfr.add_trial(&sine(30.0, 0.0, 0, dims.nfft), 1);

        let mut rows = vec![vec![0.0; dims.n_freqs]; 2];
        tfr.power_for_channels_into(&mut rows);
        let expected = tfr.power_for_channels();
        for (row, exp) in rows.iter().zip(expected.iter()) {
            for (&a, &b) in row.iter().zip(exp.iter()) {
                assert!((a as f32 - b).abs() <= 1e-6 * b.abs().max(1.0));
            }
        }
        assert_eq!(argmax(&expected[0]), 4);
        assert_eq!(argmax(&expected[1]), 29);
    }

    #[test]
    fn it_gives_unit_coherence_for_identical_channels() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let mut mean = vec![0.0; dims.n_freqs];
        let mut stdev = vec![0.0; dims.n_freqs];

        for trial in 0..4 {
            let signal = noisy(&sine(10.0, 0.0, trial * dims.nfft, dims.nfft), &mut rng, 0.5);
            tfr.add_trial(&signal, 0);
            tfr.add_trial(&signal, 1);
            tfr.mean_coherence_with_stdev(0, 1, &mut mean, &mut stdev, 0);
        }

        for (&m, &s) in mean.iter().zip(stdev.iter()) {
            assert!((m - 1.0).abs() < 1e-9, "coherence {}", m);
            assert!(s < 1e-6);
        }
    }

    #[test]
    fn it_tracks_a_shared_tone_against_independent_noise() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let mut rng = StdRng::seed_from_u64(11);
        let mut mean = vec![0.0; dims.n_freqs];

        for trial in 0..10 {
            let start = trial * dims.nfft;
            let x = noisy(&sine(10.0, 0.0, start, dims.nfft), &mut rng, 0.5);
            let y = noisy(&sine(10.0, 0.3, start, dims.nfft), &mut rng, 0.5);
            tfr.add_trial(&x, 0);
            tfr.add_trial(&y, 1);
            tfr.mean_coherence(0, 1, &mut mean, 0);
        }

        assert_eq!(mean.len(), 40);
        for &c in mean.iter() {
            assert!(c >= 0.0 && c <= 1.0, "coherence {} out of range", c);
        }
        assert!(mean[9] > 0.9, "coherence at 10 Hz was {}", mean[9]);
    }

    #[test]
    fn it_decays_towards_zero_for_independent_noise() {
        let dims = TfrDimensions::new(FS, 2.0, 1.0, 0.1, 2.0, 40.0, 2.0);
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let mut rng = StdRng::seed_from_u64(5);
        let mut mean = vec![0.0; dims.n_freqs];

        let average = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        let mut early = 0.0;
        for trial in 0..40 {
            let silent = vec![0.0f32; dims.nfft];
            let x = noisy(&silent, &mut rng, 1.0);
            let y = noisy(&silent, &mut rng, 1.0);
            tfr.add_trial(&x, 0);
            tfr.add_trial(&y, 1);
            tfr.mean_coherence(0, 1, &mut mean, 0);
            if trial == 1 {
                early = average(&mean[..]);
            }
        }

        let late = average(&mean[..]);
        assert!(late < early, "late {} early {}", late, early);
        assert!(late < 0.2, "coherence of independent noise was {}", late);
    }

    // Ten trials of independent noise, then six where both channels carry the same noise.
    fn coherence_after_the_channels_lock_together(alpha: f64) -> f64 {
        let dims = TfrDimensions::new(FS, 2.0, 1.0, 0.1, 2.0, 40.0, 2.0);
        let mut tfr = CumulativeTfr::new(2, 1, dims, alpha);
        let mut rng = StdRng::seed_from_u64(21);
        let mut mean = vec![0.0; dims.n_freqs];
        let silent = vec![0.0f32; dims.nfft];

        for trial in 0..16 {
            let x = noisy(&silent, &mut rng, 1.0);
            let y = if trial < 10 {
                noisy(&silent, &mut rng, 1.0)
            } else {
                x.clone()
            };
            tfr.add_trial(&x, 0);
            tfr.add_trial(&y, 1);
            tfr.mean_coherence(0, 1, &mut mean, 0);
        }
        mean.iter().sum::<f64>() / mean.len() as f64
    }

    #[test]
    fn it_follows_a_change_faster_with_decay() {
        let plain = coherence_after_the_channels_lock_together(0.0);
        let decayed = coherence_after_the_channels_lock_together(0.5);
        assert!(plain < 0.5, "plain average reached {}", plain);
        assert!(decayed > 0.9, "decayed average only reached {}", decayed);
    }

    #[test]
    fn it_reports_nan_without_power() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let mut mean = vec![0.0; dims.n_freqs];
        tfr.mean_coherence(0, 1, &mut mean, 0);
        assert!(mean.iter().all(|c| c.is_nan()));
    }

    #[test]
    fn it_uses_a_point_estimate_with_one_time_of_interest() {
        let dims = TfrDimensions::new(FS, 2.0, 2.0, 0.1, 5.0, 10.0, 5.0);
        assert_eq!(dims.n_times, 1);
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let signal = sine(5.0, 0.0, 0, dims.nfft);
        let mut mean = vec![0.0; dims.n_freqs];
        let mut stdev = vec![1.0; dims.n_freqs];
        tfr.add_trial(&signal, 0);
        tfr.add_trial(&signal, 1);
        tfr.mean_coherence_with_stdev(0, 1, &mut mean, &mut stdev, 0);
        assert!((mean[0] - 1.0).abs() < 1e-9);
        assert_eq!(stdev, vec![0.0, 0.0]);
    }

    #[test]
    fn it_forgets_accumulated_state_on_reset() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(2, 1, dims, 0.0);
        let signal = sine(10.0, 0.0, 0, dims.nfft);
        tfr.add_trial(&signal, 0);
        tfr.add_trial(&signal, 1);
        tfr.reset();

        assert!(tfr.power_for_channels()[0].iter().all(|&p| p == 0.0));
        let mut mean = vec![0.0; dims.n_freqs];
        tfr.mean_coherence(0, 1, &mut mean, 0);
        assert!(mean.iter().all(|c| c.is_nan()));
    }

    #[test]
    #[should_panic]
    fn it_rejects_short_segments() {
        let dims = scenario_dims();
        let mut tfr = CumulativeTfr::new(1, 0, dims, 0.0);
        tfr.add_trial(&[0.0; 10], 0);
    }
}
