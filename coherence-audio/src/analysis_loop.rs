//! Reader side: polls for fresh segments, analyses them and publishes results.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use coherence_sync::{ReadHandle, SharedBuffer, SyncError, WriteHandle};
use log::{debug, error};

use crate::pipeline::AnalysisPipeline;
use crate::shared_data::{CoherenceResults, PerChannelSegments};

pub struct AnalysisLoop {
    pipeline: Box<dyn AnalysisPipeline + Send>,
    // Trial of the last segment analysed, so a segment is never fed twice.
    last_trial: u64,
}

impl AnalysisLoop {
    pub fn new(pipeline: Box<dyn AnalysisPipeline + Send>) -> Self {
        Self {
            pipeline,
            last_trial: 0,
        }
    }

    pub fn pipeline(&self) -> &dyn AnalysisPipeline {
        self.pipeline.as_ref()
    }

    pub fn reset(&mut self) {
        self.pipeline.reset();
        self.last_trial = 0;
    }

    /// Analyses the latest segment if it has not been seen yet. Returns whether results were
    /// committed.
    pub fn step(
        &mut self,
        reader: &mut ReadHandle<PerChannelSegments>,
        writer: &mut WriteHandle<CoherenceResults>,
    ) -> bool {
        let fresh = reader.refresh();
        let segments = match reader.get() {
            Some(segments) if segments.trial == 0 => {
                if fresh {
                    debug!("ignoring a segment committed without a trial number");
                }
                return false;
            }
            Some(segments) if segments.trial != self.last_trial => segments,
            _ => return false,
        };

        if segments.trial > self.last_trial + 1 {
            debug!(
                "skipped {} segments, analysing trial {}",
                segments.trial - self.last_trial - 1,
                segments.trial
            );
        }
        self.pipeline.process(segments, &mut **writer);
        self.last_trial = segments.trial;
        writer.commit();
        debug!("published results for trial {}", self.last_trial);
        true
    }

    /// Polls until `should_exit` is set. Returns the number of segments analysed, or the
    /// registration error if another reader of `data` or writer of `results` exists.
    pub fn run(
        &mut self,
        data: &SharedBuffer<PerChannelSegments>,
        results: &SharedBuffer<CoherenceResults>,
        should_exit: &AtomicBool,
    ) -> Result<u64, SyncError> {
        let mut reader = data.with_read_access().map_err(|e| {
            error!("analysis loop could not read segments: {}", e);
            e
        })?;
        let mut writer = results.with_write_access().map_err(|e| {
            error!("analysis loop could not write results: {}", e);
            e
        })?;

        let mut analysed = 0;
        while !should_exit.load(Ordering::Acquire) {
            if self.step(&mut reader, &mut writer) {
                analysed += 1;
            } else {
                thread::yield_now();
            }
        }
        Ok(analysed)
    }
}

pub type AnalysisOutcome = (AnalysisLoop, Result<u64, SyncError>);

/// Runs `analysis` on its own thread. The loop is handed back on join so its accumulated state
/// outlives the thread.
pub fn spawn_analysis_thread(
    mut analysis: AnalysisLoop,
    data: Arc<SharedBuffer<PerChannelSegments>>,
    results: Arc<SharedBuffer<CoherenceResults>>,
    should_exit: Arc<AtomicBool>,
) -> io::Result<JoinHandle<AnalysisOutcome>> {
    thread::Builder::new()
        .name("coherence-analysis".to_string())
        .spawn(move || {
            let outcome = analysis.run(&data, &results, &should_exit);
            (analysis, outcome)
        })
}
