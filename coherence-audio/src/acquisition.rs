//! Writer side: cuts incoming sample blocks into segments and pushes them to analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coherence_sync::WriteHandle;
use log::debug;

use crate::config::CoherenceConfig;
use crate::shared_data::PerChannelSegments;

/// Counters shown next to the results. Both only grow until the session is reconfigured.
#[derive(Debug, Default)]
pub struct Diagnostics {
    trials: AtomicU64,
    discarded: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trials(&self) -> u64 {
        self.trials.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Returns the number of the trial just completed.
    pub fn record_trial(&self) -> u64 {
        self.trials.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_discard(&self) -> u64 {
        self.discarded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset(&self) {
        self.trials.store(0, Ordering::Relaxed);
        self.discarded.store(0, Ordering::Relaxed);
    }
}

/// Decides whether a sample spoils the segment being collected.
pub trait ArtifactGate: Send {
    /// `row` is the segment row, `previous` the sample before `sample` on that row.
    fn is_artifact(&mut self, row: usize, previous: f32, sample: f32) -> bool;
}

/// Flags any jump between consecutive samples larger than `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdGate {
    pub threshold: f32,
}

impl ArtifactGate for ThresholdGate {
    fn is_artifact(&mut self, _row: usize, previous: f32, sample: f32) -> bool {
        (sample - previous).abs() > self.threshold
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGate;

impl ArtifactGate for NoGate {
    fn is_artifact(&mut self, _row: usize, _previous: f32, _sample: f32) -> bool {
        false
    }
}

pub struct SegmentAcquirer {
    // Input channel feeding each segment row.
    channels: Vec<usize>,
    segment_len: usize,
    fill: usize,
    last_sample: Vec<Option<f32>>,
    gate: Box<dyn ArtifactGate>,
    settle_samples: usize,
    settle_remaining: usize,
    diagnostics: Arc<Diagnostics>,
}

impl SegmentAcquirer {
    pub fn new(config: &CoherenceConfig, diagnostics: Arc<Diagnostics>) -> Self {
        let (gate, settle_samples): (Box<dyn ArtifactGate>, usize) = match &config.artifact {
            Some(artifact) => (
                Box::new(ThresholdGate {
                    threshold: artifact.threshold,
                }),
                (artifact.settle_secs * config.sample_rate).round() as usize,
            ),
            None => (Box::new(NoGate), 0),
        };
        let channels = config.mode.channels();
        Self {
            last_sample: vec![None; channels.len()],
            channels,
            segment_len: config.segment_samples(),
            fill: 0,
            gate,
            settle_samples,
            settle_remaining: 0,
            diagnostics,
        }
    }

    /// Replaces the artifact policy. `settle_samples` is how long to wait after an artifact.
    pub fn with_gate(mut self, gate: Box<dyn ArtifactGate>, settle_samples: usize) -> Self {
        self.gate = gate;
        self.settle_samples = settle_samples;
        self
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    /// Samples collected towards the current segment.
    pub fn filled(&self) -> usize {
        self.fill
    }

    pub fn is_settling(&self) -> bool {
        self.settle_remaining > 0
    }

    /// Drops the partial segment and any pending settle period.
    pub fn reset(&mut self) {
        self.fill = 0;
        self.settle_remaining = 0;
        for last in self.last_sample.iter_mut() {
            *last = None;
        }
    }

    /// Appends one block of samples. `block` is indexed by input channel and every channel in
    /// use must carry the same number of samples. Samples left over after a segment fills start
    /// the next one. Returns the number of segments committed.
    pub fn process_block(
        &mut self,
        writer: &mut WriteHandle<PerChannelSegments>,
        block: &[&[f32]],
    ) -> usize {
        assert!(
            writer.n_channels() == self.channels.len() && writer.segment_len() == self.segment_len,
            "segment buffer does not match the acquirer"
        );
        let n_samples = match self.channels.first() {
            Some(&first) => block[first].len(),
            None => return 0,
        };
        for &channel in self.channels.iter() {
            assert!(block[channel].len() == n_samples, "ragged block");
        }

        let mut commits = 0;
        for s in 0..n_samples {
            if self.check_artifact(block, s) {
                if self.settle_remaining == 0 {
                    let discarded = self.diagnostics.record_discard();
                    debug!(
                        "artifact after {} samples, dropping segment ({} discarded so far)",
                        self.fill, discarded
                    );
                }
                self.fill = 0;
                self.settle_remaining = self.settle_samples;
                continue;
            }
            if self.settle_remaining > 0 {
                self.settle_remaining -= 1;
                continue;
            }

            for (row, &channel) in self.channels.iter().enumerate() {
                writer.channel_mut(row)[self.fill] = block[channel][s];
            }
            self.fill += 1;

            if self.fill == self.segment_len {
                writer.trial = self.diagnostics.record_trial();
                writer.commit();
                self.fill = 0;
                commits += 1;
            }
        }
        commits
    }

    // Checks every row and remembers the samples for the next comparison.
    fn check_artifact(&mut self, block: &[&[f32]], s: usize) -> bool {
        let mut artifact = false;
        for (row, &channel) in self.channels.iter().enumerate() {
            let sample = block[channel][s];
            if let Some(previous) = self.last_sample[row] {
                if self.gate.is_artifact(row, previous, sample) {
                    artifact = true;
                }
            }
            self.last_sample[row] = Some(sample);
        }
        artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use coherence_sync::SharedBuffer;

    use crate::config::{AnalysisMode, ArtifactConfig};

    fn test_config(segment_len: f64, artifact: Option<ArtifactConfig>) -> CoherenceConfig {
        let mut config = CoherenceConfig::new(
            10.0,
            AnalysisMode::Coherence {
                group1: vec![2],
                group2: vec![0],
            },
        );
        config.segment_len = segment_len;
        config.window_len = segment_len / 2.0;
        config.artifact = artifact;
        config
    }

    fn buffer_for(config: &CoherenceConfig) -> SharedBuffer<PerChannelSegments> {
        SharedBuffer::new(PerChannelSegments::new(
            config.mode.n_channels(),
            config.segment_samples(),
        ))
    }

    #[test]
    fn it_commits_full_segments_and_keeps_the_remainder() {
        let config = test_config(0.4, None);
        let buffer = buffer_for(&config);
        let diagnostics = Arc::new(Diagnostics::new());
        let mut acquirer = SegmentAcquirer::new(&config, diagnostics.clone());

        let ch0: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let ch1 = vec![9.0; 6];
        let ch2: Vec<f32> = (0..6).map(|i| -(i as f32)).collect();
        let block: [&[f32]; 3] = [&ch0, &ch1, &ch2];

        {
            let mut writer = buffer.with_write_access().expect("writer");
            assert_eq!(acquirer.process_block(&mut writer, &block), 1);
            assert_eq!(acquirer.filled(), 2);
        }
        assert_eq!(diagnostics.trials(), 1);

        let reader = buffer.with_read_access().expect("reader");
        assert_eq!(reader.trial, 1);
        // Rows follow group1 then group2, i.e. input channels 2 and 0.
        assert_eq!(reader.channel(0), &[0.0, -1.0, -2.0, -3.0]);
        assert_eq!(reader.channel(1), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn it_spans_segments_across_blocks() {
        let config = test_config(0.4, None);
        let buffer = buffer_for(&config);
        let diagnostics = Arc::new(Diagnostics::new());
        let mut acquirer = SegmentAcquirer::new(&config, diagnostics.clone());
        let mut writer = buffer.with_write_access().expect("writer");

        let mut committed = 0;
        for start in (0..12).step_by(3) {
            let samples: Vec<f32> = (start..start + 3).map(|i| i as f32).collect();
            let block: [&[f32]; 3] = [&samples, &samples, &samples];
            committed += acquirer.process_block(&mut writer, &block);
        }
        drop(writer);

        assert_eq!(committed, 3);
        assert_eq!(diagnostics.trials(), 3);
        let reader = buffer.with_read_access().expect("reader");
        assert_eq!(reader.trial, 3);
        assert_eq!(reader.channel(1), &[8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn it_discards_and_settles_after_an_artifact() {
        let config = test_config(
            0.4,
            Some(ArtifactConfig {
                threshold: 5.0,
                settle_secs: 0.2,
            }),
        );
        let buffer = buffer_for(&config);
        let diagnostics = Arc::new(Diagnostics::new());
        let mut acquirer = SegmentAcquirer::new(&config, diagnostics.clone());
        let mut writer = buffer.with_write_access().expect("writer");

        // Jump at index 2, then two settle samples, then four clean ones.
        let spiky = [0.0, 1.0, 50.0, 50.0, 50.0, 51.0, 52.0, 53.0, 54.0];
        let flat = [0.0; 9];
        let block: [&[f32]; 3] = [&flat, &flat, &spiky];
        assert_eq!(acquirer.process_block(&mut writer, &block), 1);
        drop(writer);

        assert_eq!(diagnostics.discarded(), 1);
        assert_eq!(diagnostics.trials(), 1);
        let reader = buffer.with_read_access().expect("reader");
        assert_eq!(reader.channel(0), &[51.0, 52.0, 53.0, 54.0]);
    }

    #[test]
    fn it_restarts_the_wait_on_further_artifacts() {
        let config = test_config(
            0.2,
            Some(ArtifactConfig {
                threshold: 5.0,
                settle_secs: 0.2,
            }),
        );
        let buffer = buffer_for(&config);
        let diagnostics = Arc::new(Diagnostics::new());
        let mut acquirer = SegmentAcquirer::new(&config, diagnostics.clone());
        let mut writer = buffer.with_write_access().expect("writer");

        let spiky = [0.0, 10.0, 10.0, 20.0, 20.0];
        let flat = [0.0; 5];
        let block: [&[f32]; 3] = [&flat, &flat, &spiky];
        assert_eq!(acquirer.process_block(&mut writer, &block), 0);
        assert!(acquirer.is_settling());
        assert_eq!(acquirer.filled(), 0);
        // One event, even though the wait was restarted.
        assert_eq!(diagnostics.discarded(), 1);

        let calm = [20.0, 20.0, 20.0, 20.0];
        let block: [&[f32]; 3] = [&flat[..4], &flat[..4], &calm];
        assert_eq!(acquirer.process_block(&mut writer, &block), 1);
        assert!(!acquirer.is_settling());
    }

    #[test]
    fn it_accepts_any_gate() {
        struct RowGate;
        impl ArtifactGate for RowGate {
            fn is_artifact(&mut self, row: usize, _previous: f32, sample: f32) -> bool {
                row == 1 && sample < 0.0
            }
        }

        let config = test_config(0.2, None);
        let buffer = buffer_for(&config);
        let diagnostics = Arc::new(Diagnostics::new());
        let mut acquirer =
            SegmentAcquirer::new(&config, diagnostics.clone()).with_gate(Box::new(RowGate), 0);
        let mut writer = buffer.with_write_access().expect("writer");

        let row1 = [1.0, -1.0, 1.0, 1.0];
        let other = [3.0; 4];
        let block: [&[f32]; 3] = [&row1, &other, &other];
        assert_eq!(acquirer.process_block(&mut writer, &block), 1);
        assert_eq!(diagnostics.discarded(), 1);
    }

    #[test]
    fn it_forgets_partial_segments_on_reset() {
        let config = test_config(0.4, None);
        let buffer = buffer_for(&config);
        let mut acquirer = SegmentAcquirer::new(&config, Arc::new(Diagnostics::new()));
        let mut writer = buffer.with_write_access().expect("writer");

        let samples = [1.0; 3];
        let block: [&[f32]; 3] = [&samples, &samples, &samples];
        acquirer.process_block(&mut writer, &block);
        assert_eq!(acquirer.filled(), 3);
        acquirer.reset();
        assert_eq!(acquirer.filled(), 0);
        assert_eq!(acquirer.process_block(&mut writer, &block), 0);
    }
}
