use itertools::iproduct;

use crate::config::{AnalysisMode, CoherenceConfig};
use crate::shared_data::{CoherenceResults, PerChannelSegments, ResultKind};
use crate::tfr::{CumulativeTfr, TfrDimensions};

/// Turns one segment per channel into one row of results per pair or channel.
pub trait AnalysisPipeline {
    /// `results` must already be sized for `n_rows` rows of `frequencies().len()` values.
    fn process(&mut self, segments: &PerChannelSegments, results: &mut CoherenceResults);

    /// Forgets everything accumulated so far.
    fn reset(&mut self);

    fn result_kind(&self) -> ResultKind;

    fn n_rows(&self) -> usize;

    fn frequencies(&self) -> Vec<f64>;
}

fn feed_channels(tfr: &mut CumulativeTfr, segments: &PerChannelSegments) {
    assert!(
        segments.n_channels() == tfr.n_channels(),
        "segment rows do not match the configured channels"
    );
    for row in 0..segments.n_channels() {
        tfr.add_trial(segments.channel(row), row);
    }
}

/// Coherence between every channel of one group and every channel of the other. Segment rows
/// hold group1 followed by group2; pair `i * n_group2 + j` is (group1[i], group2[j]).
pub struct CoherencePipeline {
    tfr: CumulativeTfr,
    n_group1: usize,
    n_group2: usize,
}

impl CoherencePipeline {
    pub fn new(n_group1: usize, n_group2: usize, dims: TfrDimensions, alpha: f64) -> Self {
        Self {
            tfr: CumulativeTfr::new(n_group1 + n_group2, n_group1 * n_group2, dims, alpha),
            n_group1,
            n_group2,
        }
    }
}

impl AnalysisPipeline for CoherencePipeline {
    fn process(&mut self, segments: &PerChannelSegments, results: &mut CoherenceResults) {
        assert!(results.n_rows() == self.n_rows(), "results sized for another mode");
        feed_channels(&mut self.tfr, segments);
        for (i, j) in iproduct!(0..self.n_group1, 0..self.n_group2) {
            let pair = i * self.n_group2 + j;
            self.tfr
                .mean_coherence(i, self.n_group1 + j, &mut results.rows[pair], pair);
        }
        results.trial = segments.trial;
    }

    fn reset(&mut self) {
        self.tfr.reset();
    }

    fn result_kind(&self) -> ResultKind {
        ResultKind::Coherence
    }

    fn n_rows(&self) -> usize {
        self.n_group1 * self.n_group2
    }

    fn frequencies(&self) -> Vec<f64> {
        self.tfr.frequencies()
    }
}

/// Power spectrum of each channel on its own.
pub struct SpectrogramPipeline {
    tfr: CumulativeTfr,
}

impl SpectrogramPipeline {
    pub fn new(n_channels: usize, dims: TfrDimensions, alpha: f64) -> Self {
        Self {
            tfr: CumulativeTfr::new(n_channels, 0, dims, alpha),
        }
    }
}

impl AnalysisPipeline for SpectrogramPipeline {
    fn process(&mut self, segments: &PerChannelSegments, results: &mut CoherenceResults) {
        assert!(results.n_rows() == self.n_rows(), "results sized for another mode");
        feed_channels(&mut self.tfr, segments);
        self.tfr.power_for_channels_into(&mut results.rows);
        results.trial = segments.trial;
    }

    fn reset(&mut self) {
        self.tfr.reset();
    }

    fn result_kind(&self) -> ResultKind {
        ResultKind::Power
    }

    fn n_rows(&self) -> usize {
        self.tfr.n_channels()
    }

    fn frequencies(&self) -> Vec<f64> {
        self.tfr.frequencies()
    }
}

pub fn build_pipeline(config: &CoherenceConfig) -> Box<dyn AnalysisPipeline + Send> {
    let dims = config.dimensions();
    match &config.mode {
        AnalysisMode::Coherence { group1, group2 } => Box::new(CoherencePipeline::new(
            group1.len(),
            group2.len(),
            dims,
            config.alpha,
        )),
        AnalysisMode::Spectrogram { channels } => {
            Box::new(SpectrogramPipeline::new(channels.len(), dims, config.alpha))
        }
    }
}
