/// One fixed-length buffer of samples per analysed channel, filled by acquisition and handed to
/// analysis as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct PerChannelSegments {
    channels: Vec<Vec<f32>>,
    /// Number of the segment currently held, starting at 1. Writers must stamp it before each
    /// commit: the analysis loop never analyses a segment whose trial is 0.
    pub trial: u64,
}

impl PerChannelSegments {
    pub fn new(n_channels: usize, segment_len: usize) -> Self {
        Self {
            channels: vec![vec![0.0; segment_len]; n_channels],
            trial: 0,
        }
    }

    /// Allocates; only called while both sides are locked out.
    pub fn resize(&mut self, n_channels: usize, segment_len: usize) {
        self.channels.resize_with(n_channels, Vec::new);
        for channel in self.channels.iter_mut() {
            channel.clear();
            channel.resize(segment_len, 0.0);
        }
        self.trial = 0;
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn segment_len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    pub fn channel(&self, row: usize) -> &[f32] {
        &self.channels[row]
    }

    pub fn channel_mut(&mut self, row: usize) -> &mut [f32] {
        &mut self.channels[row]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    // One row per channel pair.
    Coherence,
    // One row per channel.
    Power,
}

/// Latest analysis output, one frequency vector per row.
#[derive(Debug, Clone, PartialEq)]
pub struct CoherenceResults {
    pub kind: ResultKind,
    pub rows: Vec<Vec<f64>>,
    pub frequencies: Vec<f64>,
    // Trial of the segment these were computed from; 0 if none yet.
    pub trial: u64,
}

impl CoherenceResults {
    pub fn new(kind: ResultKind, n_rows: usize, frequencies: Vec<f64>) -> Self {
        Self {
            kind,
            rows: vec![vec![0.0; frequencies.len()]; n_rows],
            frequencies,
            trial: 0,
        }
    }

    pub fn resize(&mut self, kind: ResultKind, n_rows: usize, frequencies: &[f64]) {
        self.kind = kind;
        self.rows.resize_with(n_rows, Vec::new);
        for row in self.rows.iter_mut() {
            row.clear();
            row.resize(frequencies.len(), 0.0);
        }
        self.frequencies.clear();
        self.frequencies.extend_from_slice(frequencies);
        self.trial = 0;
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}
