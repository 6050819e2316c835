use std::collections::HashSet;
use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_yaml;

use crate::error::CoherenceError;
use crate::tfr::TfrDimensions;

// Frequency resolution is a fraction of the window's natural resolution of 1 / window_len.
const INTERP_RATIO: f64 = 2.0;

fn default_segment_len() -> f64 {
    4.0
}

fn default_window_len() -> f64 {
    2.0
}

fn default_step_len() -> f64 {
    0.1
}

fn default_freq_start() -> f64 {
    1.0
}

fn default_freq_end() -> f64 {
    40.0
}

fn default_settle_secs() -> f64 {
    1.0
}

/// Which analysis runs on each segment. Rows of a segment are laid out in the order returned by
/// `channels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisMode {
    // Coherence between every channel of group1 and every channel of group2.
    Coherence {
        group1: Vec<usize>,
        group2: Vec<usize>,
    },
    // Power spectrum of each channel, no cross-channel work.
    Spectrogram {
        channels: Vec<usize>,
    },
}

impl AnalysisMode {
    pub fn channels(&self) -> Vec<usize> {
        match self {
            AnalysisMode::Coherence { group1, group2 } => {
                group1.iter().chain(group2.iter()).cloned().collect()
            }
            AnalysisMode::Spectrogram { channels } => channels.clone(),
        }
    }

    pub fn n_channels(&self) -> usize {
        match self {
            AnalysisMode::Coherence { group1, group2 } => group1.len() + group2.len(),
            AnalysisMode::Spectrogram { channels } => channels.len(),
        }
    }

    pub fn n_pairs(&self) -> usize {
        match self {
            AnalysisMode::Coherence { group1, group2 } => group1.len() * group2.len(),
            AnalysisMode::Spectrogram { .. } => 0,
        }
    }

    /// Number of result rows: one per pair in coherence mode, one per channel otherwise.
    pub fn n_rows(&self) -> usize {
        match self {
            AnalysisMode::Coherence { .. } => self.n_pairs(),
            AnalysisMode::Spectrogram { channels } => channels.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    // Largest allowed jump between two consecutive samples of a channel.
    pub threshold: f32,
    // How long to wait after an artifact before collecting again.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceConfig {
    pub sample_rate: f64,
    // Seconds of data per segment; also the FFT length.
    #[serde(default = "default_segment_len")]
    pub segment_len: f64,
    // Seconds covered by each wavelet.
    #[serde(default = "default_window_len")]
    pub window_len: f64,
    // Seconds between times of interest within a segment.
    #[serde(default = "default_step_len")]
    pub step_len: f64,
    #[serde(default = "default_freq_start")]
    pub freq_start: f64,
    #[serde(default = "default_freq_end")]
    pub freq_end: f64,
    // Defaults to 1 / (2 * window_len).
    #[serde(default)]
    pub freq_step: Option<f64>,
    // 0 keeps a plain running average, anything up to 1 decays older segments.
    #[serde(default)]
    pub alpha: f64,
    pub mode: AnalysisMode,
    #[serde(default)]
    pub artifact: Option<ArtifactConfig>,
}

fn assertion(cond: bool, err_msg: &str) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(err_msg.to_string())
    }
}

fn assert_unique(channels: &[usize], err_msg: &str) -> Result<(), String> {
    let mut seen = HashSet::new();
    assertion(channels.iter().all(|c| seen.insert(*c)), err_msg)
}

impl CoherenceConfig {
    pub fn new(sample_rate: f64, mode: AnalysisMode) -> Self {
        Self {
            sample_rate,
            segment_len: default_segment_len(),
            window_len: default_window_len(),
            step_len: default_step_len(),
            freq_start: default_freq_start(),
            freq_end: default_freq_end(),
            freq_step: None,
            alpha: 0.0,
            mode,
            artifact: None,
        }
    }

    pub fn from_yaml(s: &str) -> Result<Self, CoherenceError> {
        let config: CoherenceConfig = match serde_yaml::from_str(s) {
            Ok(config) => Ok(config),
            Err(e) => Err(CoherenceError::Config(format!("error parsing config: {}", e))),
        }?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_reader<R: Read>(mut reader: R) -> Result<Self, CoherenceError> {
        let mut s = String::new();
        reader.read_to_string(&mut s)?;
        Self::from_yaml(&s)
    }

    pub fn to_yaml(&self) -> Result<String, CoherenceError> {
        match serde_yaml::to_string(self) {
            Ok(s) => Ok(s),
            Err(e) => Err(CoherenceError::Config(format!("error writing config: {}", e))),
        }
    }

    pub fn freq_step(&self) -> f64 {
        match self.freq_step {
            Some(step) => step,
            None => 1.0 / (self.window_len * INTERP_RATIO),
        }
    }

    pub fn dimensions(&self) -> TfrDimensions {
        TfrDimensions::new(
            self.sample_rate,
            self.segment_len,
            self.window_len,
            self.step_len,
            self.freq_start,
            self.freq_end,
            self.freq_step(),
        )
    }

    pub fn segment_samples(&self) -> usize {
        (self.segment_len * self.sample_rate).round() as usize
    }

    pub fn with_mode(&self, mode: AnalysisMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), CoherenceError> {
        self.check().map_err(|e| {
            CoherenceError::Config(format!("error validating coherence config: {}", e))
        })
    }

    fn check(&self) -> Result<(), String> {
        assertion(self.sample_rate > 0.0, "sample_rate must be greater than 0")?;
        assertion(self.window_len > 0.0, "window_len must be greater than 0")?;
        assertion(
            self.segment_len > self.window_len,
            "segment_len must be greater than window_len",
        )?;
        assertion(self.step_len > 0.0, "step_len must be greater than 0")?;
        assertion(self.freq_step() > 0.0, "freq_step must be greater than 0")?;
        assertion(self.freq_start > 0.0, "freq_start must be greater than 0")?;
        assertion(
            self.freq_end >= self.freq_start,
            "freq_end must be at least freq_start",
        )?;
        assertion(
            self.freq_end < self.sample_rate / 2.0,
            "freq_end must be below the Nyquist frequency",
        )?;
        assertion(
            self.alpha >= 0.0 && self.alpha <= 1.0,
            "alpha must be within [0, 1]",
        )?;
        assertion(
            (self.window_len * self.sample_rate).round() >= 2.0,
            "window_len must span at least two samples",
        )?;
        let dims = self.dimensions();
        assertion(
            dims.n_times > 0 && dims.time_index(dims.n_times - 1) < dims.nfft,
            "the last time of interest must fall inside the segment",
        )?;
        match &self.mode {
            AnalysisMode::Coherence { group1, group2 } => {
                assertion(!group1.is_empty(), "group1 must not be empty")?;
                assertion(!group2.is_empty(), "group2 must not be empty")?;
                assert_unique(
                    &self.mode.channels(),
                    "groups must not share or repeat channels",
                )?;
            }
            AnalysisMode::Spectrogram { channels } => {
                assertion(!channels.is_empty(), "channels must not be empty")?;
                assert_unique(channels, "channels must not repeat")?;
            }
        }
        if let Some(artifact) = &self.artifact {
            assertion(
                artifact.threshold > 0.0,
                "artifact.threshold must be greater than 0",
            )?;
            assertion(
                artifact.settle_secs >= 0.0,
                "artifact.settle_secs must not be negative",
            )?;
        }
        Ok(())
    }
}
