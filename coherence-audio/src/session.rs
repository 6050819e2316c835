use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use coherence_sync::SharedBuffer;
use log::{error, info, warn};

use crate::acquisition::{Diagnostics, SegmentAcquirer};
use crate::analysis_loop::{spawn_analysis_thread, AnalysisLoop, AnalysisOutcome};
use crate::config::{AnalysisMode, CoherenceConfig};
use crate::error::CoherenceError;
use crate::pipeline::build_pipeline;
use crate::shared_data::{CoherenceResults, PerChannelSegments};

/// Owns both shared buffers and the analysis thread, and swaps configurations while nothing is
/// running.
pub struct Session {
    config: CoherenceConfig,
    config_version: u64,
    data: Arc<SharedBuffer<PerChannelSegments>>,
    results: Arc<SharedBuffer<CoherenceResults>>,
    diagnostics: Arc<Diagnostics>,
    should_exit: Arc<AtomicBool>,
    // Exactly one of these is set.
    analysis: Option<AnalysisLoop>,
    worker: Option<JoinHandle<AnalysisOutcome>>,
}

impl Session {
    pub fn new(config: CoherenceConfig) -> Result<Self, CoherenceError> {
        config.validate()?;
        let pipeline = build_pipeline(&config);
        let segments = PerChannelSegments::new(config.mode.n_channels(), config.segment_samples());
        let results = CoherenceResults::new(
            pipeline.result_kind(),
            pipeline.n_rows(),
            pipeline.frequencies(),
        );
        info!(
            "new session: {} channels, {} result rows, {} samples per segment",
            segments.n_channels(),
            results.n_rows(),
            segments.segment_len()
        );

        Ok(Self {
            config,
            config_version: 0,
            data: Arc::new(SharedBuffer::new(segments)),
            results: Arc::new(SharedBuffer::new(results)),
            diagnostics: Arc::new(Diagnostics::new()),
            should_exit: Arc::new(AtomicBool::new(false)),
            analysis: Some(AnalysisLoop::new(pipeline)),
            worker: None,
        })
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    /// Bumped on every successful `reconfigure`.
    pub fn config_version(&self) -> u64 {
        self.config_version
    }

    pub fn data(&self) -> Arc<SharedBuffer<PerChannelSegments>> {
        self.data.clone()
    }

    pub fn results(&self) -> Arc<SharedBuffer<CoherenceResults>> {
        self.results.clone()
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    /// Writer-side state for whoever feeds samples into `data()`.
    pub fn acquirer(&self) -> SegmentAcquirer {
        SegmentAcquirer::new(&self.config, self.diagnostics.clone())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<(), CoherenceError> {
        let analysis = match self.analysis.take() {
            Some(analysis) => analysis,
            None => {
                warn!("analysis thread already running");
                return Ok(());
            }
        };

        self.should_exit.store(false, Ordering::Release);
        match spawn_analysis_thread(
            analysis,
            self.data.clone(),
            self.results.clone(),
            self.should_exit.clone(),
        ) {
            Ok(worker) => {
                info!("analysis thread started");
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                // The loop went down with the closure.
                self.analysis = Some(AnalysisLoop::new(build_pipeline(&self.config)));
                Err(CoherenceError::from(e))
            }
        }
    }

    /// Signals the analysis thread and waits for it. Returns how many segments it analysed.
    pub fn stop(&mut self) -> Result<u64, CoherenceError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(0),
        };

        self.should_exit.store(true, Ordering::Release);
        match worker.join() {
            Ok((analysis, outcome)) => {
                self.analysis = Some(analysis);
                let analysed = outcome?;
                info!("analysis thread stopped after {} segments", analysed);
                Ok(analysed)
            }
            Err(_) => {
                error!("analysis thread panicked");
                self.analysis = Some(AnalysisLoop::new(build_pipeline(&self.config)));
                Err(CoherenceError::Thread("analysis thread panicked"))
            }
        }
    }

    /// Installs a new configuration. Needs the session stopped and nobody holding either buffer;
    /// on failure nothing changes. All accumulated state and counters start over.
    pub fn reconfigure(&mut self, config: CoherenceConfig) -> Result<(), CoherenceError> {
        config.validate()?;
        let analysis = match self.analysis.as_mut() {
            Some(analysis) => analysis,
            None => {
                return Err(CoherenceError::Config(
                    "cannot reconfigure while the analysis thread is running".to_string(),
                ))
            }
        };

        let mut data = self.data.lockout().map_err(|e| {
            error!("reconfigure called while segments are in use");
            e
        })?;
        let mut results = self.results.lockout().map_err(|e| {
            error!("reconfigure called while results are in use");
            e
        })?;

        let pipeline = build_pipeline(&config);
        let n_channels = config.mode.n_channels();
        let segment_len = config.segment_samples();
        let kind = pipeline.result_kind();
        let n_rows = pipeline.n_rows();
        let frequencies = pipeline.frequencies();

        data.for_each_mut(|segments| segments.resize(n_channels, segment_len));
        results.for_each_mut(|r| r.resize(kind, n_rows, &frequencies));
        data.reset();
        results.reset();

        *analysis = AnalysisLoop::new(pipeline);
        self.diagnostics.reset();
        self.config = config;
        self.config_version += 1;
        info!(
            "reconfigured (version {}): {} channels, {} result rows",
            self.config_version, n_channels, n_rows
        );
        Ok(())
    }

    /// Reconfigures with only the channel selection changed.
    pub fn set_mode(&mut self, mode: AnalysisMode) -> Result<(), CoherenceError> {
        let config = self.config.with_mode(mode);
        self.reconfigure(config)
    }

    /// Forgets accumulated estimates while keeping the configuration. Needs the session stopped.
    pub fn reset(&mut self) -> Result<(), CoherenceError> {
        let config = self.config.clone();
        self.reconfigure(config)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("error stopping session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::f64::consts::PI;
    use std::thread;
    use std::time::{Duration, Instant};

    use coherence_sync::SyncError;

    use crate::shared_data::ResultKind;

    fn small_config() -> CoherenceConfig {
        let mut config = CoherenceConfig::new(
            100.0,
            AnalysisMode::Coherence {
                group1: vec![0],
                group2: vec![1],
            },
        );
        config.segment_len = 2.0;
        config.window_len = 1.0;
        config.freq_end = 10.0;
        config.freq_step = Some(1.0);
        config
    }

    #[test]
    fn it_sizes_buffers_from_the_config() {
        let session = Session::new(small_config()).expect("session");
        let results = session.results();
        let reader = results.with_read_access().expect("reader");
        assert!(!reader.is_valid());
        drop(reader);

        let acquirer = session.acquirer();
        assert_eq!(acquirer.channels(), &[0, 1]);
        assert_eq!(acquirer.segment_len(), 200);
        assert_eq!(session.config_version(), 0);
        assert!(!session.is_running());
    }

    #[test]
    fn it_rejects_invalid_configs() {
        let mut config = small_config();
        config.freq_end = 80.0;
        assert!(Session::new(config.clone()).is_err());

        let mut session = Session::new(small_config()).expect("session");
        assert!(session.reconfigure(config).is_err());
        assert_eq!(session.config_version(), 0);
    }

    #[test]
    fn it_returns_an_error_when_times_of_interest_overrun_the_segment() {
        let mut config = CoherenceConfig::new(
            1000.0,
            AnalysisMode::Coherence {
                group1: vec![0],
                group2: vec![1],
            },
        );
        config.segment_len = 0.0104;
        config.window_len = 0.0016;
        config.step_len = 0.0088;
        config.freq_end = 400.0;
        config.freq_step = Some(100.0);
        match Session::new(config) {
            Err(CoherenceError::Config(_)) => (),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("built a session whose last time of interest is past the segment"),
        }
    }

    #[test]
    fn it_refuses_to_reconfigure_while_running() {
        let mut session = Session::new(small_config()).expect("session");
        session.start().expect("start");
        assert!(session.is_running());
        match session.reconfigure(small_config()) {
            Err(CoherenceError::Config(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(session.stop().expect("stop"), 0);
        assert!(!session.is_running());
        session.reconfigure(small_config()).expect("stopped now");
    }

    #[test]
    fn it_refuses_to_reconfigure_while_acquiring() {
        let mut session = Session::new(small_config()).expect("session");
        let data = session.data();
        let _writer = data.with_write_access().expect("writer");
        match session.reconfigure(small_config()) {
            Err(CoherenceError::Sync(SyncError::Busy)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(session.config_version(), 0);
    }

    #[test]
    fn it_switches_modes() {
        let mut session = Session::new(small_config()).expect("session");
        session
            .set_mode(AnalysisMode::Spectrogram {
                channels: vec![2, 3, 5],
            })
            .expect("reconfigure");
        assert_eq!(session.config_version(), 1);
        assert_eq!(session.acquirer().channels(), &[2, 3, 5]);

        let results = session.results();
        let mut lockout = results.lockout().expect("lockout");
        lockout.for_each_mut(|r| {
            assert_eq!(r.kind, ResultKind::Power);
            assert_eq!(r.rows.len(), 3);
            assert_eq!(r.frequencies.len(), 10);
        });
    }

    #[test]
    fn it_runs_end_to_end() {
        let mut session = Session::new(small_config()).expect("session");
        session.start().expect("start");

        let data = session.data();
        let mut acquirer = session.acquirer();
        let mut writer = data.with_write_access().expect("writer");
        let samples: Vec<f32> = (0..600)
            .map(|i| (2.0 * PI * 5.0 * i as f64 / 100.0).sin() as f32)
            .collect();
        let block: [&[f32]; 2] = [&samples, &samples];
        assert_eq!(acquirer.process_block(&mut writer, &block), 3);
        drop(writer);
        assert_eq!(session.diagnostics().trials(), 3);

        let results = session.results();
        let mut display = results.with_read_access().expect("display");
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            display.refresh();
            if display.get().map_or(false, |r| r.trial == 3) {
                break;
            }
            assert!(Instant::now() < deadline, "analysis never caught up");
            thread::yield_now();
        }
        assert_eq!(display.rows.len(), 1);
        assert!((display.rows[0][4] - 1.0).abs() < 1e-9);
        drop(display);

        assert!(session.stop().expect("stop") >= 1);
        session.reset().expect("reset");
        assert_eq!(session.diagnostics().trials(), 0);
        assert!(!session.results().has_update());
    }
}
