//! Batch denoising
//!
//! A `BatchController` owns at most one background run. The run walks the
//! input root, processes every supported file through the per-file chain and
//! writes the result to the same relative path under the output root.
//! Progress and per-file failures are streamed as `ProcessingEvent`s.
//! Cancellation is cooperative and checked between files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use super::events::{EventSink, ProcessingEvent};
use crate::audio_clean::{process_file, DenoiseParameters, NoiseWindow};
use crate::audio_util::AudioFormat;
use crate::error::{DenoiseError, Result};
use crate::services::path_service;

/// Largest output gain the batch accepts
pub const MAX_GAIN_DB: f32 = 15.0;

/// Everything needed to start a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub noise_start_ms: f64,
    pub noise_end_ms: f64,
    pub params: DenoiseParameters,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let window = NoiseWindow::default();
        Self {
            input_root: PathBuf::new(),
            output_root: PathBuf::new(),
            noise_start_ms: window.start_ms,
            noise_end_ms: window.end_ms,
            params: DenoiseParameters::default(),
        }
    }
}

impl BatchConfig {
    pub fn noise_window(&self) -> NoiseWindow {
        NoiseWindow::new(self.noise_start_ms, self.noise_end_ms)
    }

    /// Checks that must pass before a run may start
    pub fn validate(&self) -> Result<()> {
        if self.input_root.as_os_str().is_empty() {
            return Err(DenoiseError::Configuration("input folder is not set".to_string()));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(DenoiseError::Configuration("output folder is not set".to_string()));
        }

        let (start, end) = (self.noise_start_ms, self.noise_end_ms);
        if !(start.is_finite() && end.is_finite() && start >= 0.0 && start < end) {
            return Err(DenoiseError::Configuration(format!(
                "noise window start ({} ms) must be non-negative and before its end ({} ms)",
                start, end
            )));
        }

        let gain = self.params.gain_db;
        if !(0.0..=MAX_GAIN_DB).contains(&gain) {
            return Err(DenoiseError::Configuration(format!(
                "gain must be within 0-{} dB, got {}",
                MAX_GAIN_DB, gain
            )));
        }

        if !self.input_root.is_dir() {
            return Err(DenoiseError::Configuration(format!(
                "input path is not a directory: {:?}",
                self.input_root
            )));
        }

        self.params.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Work list for one run, owned by whichever thread executes it
#[derive(Debug)]
pub struct BatchJob {
    input_root: PathBuf,
    output_root: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    cancel: Arc<AtomicBool>,
    processed_count: usize,
    total_count: usize,
}

impl BatchJob {
    /// Discover eligible files under `input_root`
    pub fn discover(input_root: &Path, output_root: &Path, cancel: Arc<AtomicBool>) -> Self {
        log::info!(
            "Scanning {:?} for {} files",
            input_root,
            AudioFormat::supported_extensions().join("/")
        );
        let files = path_service::discover_audio_files(input_root);
        let total_count = files.len();
        Self {
            input_root: input_root.to_path_buf(),
            output_root: output_root.to_path_buf(),
            files,
            cursor: 0,
            cancel,
            processed_count: 0,
            total_count,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn process_one(&self, source: &Path, window: &NoiseWindow, params: &DenoiseParameters) -> Result<()> {
        let destination = path_service::prepare_destination(&self.input_root, &self.output_root, source)?;
        let report = process_file(source, &destination, window, params)?;
        log::debug!(
            "Wrote {:?}: {} ch, {} frames @ {} Hz",
            destination,
            report.channels,
            report.frames,
            report.sample_rate
        );
        Ok(())
    }
}

/// Execute `job` on the calling thread, streaming events to `sink`
pub fn run_batch(
    job: &mut BatchJob,
    params: &DenoiseParameters,
    window: &NoiseWindow,
    sink: &dyn EventSink,
) -> BatchSummary {
    let total = job.total_count;
    if total == 0 {
        log::info!("No audio files found in {:?}", job.input_root);
    }

    let mut cancelled = false;
    while job.cursor < total {
        if job.is_cancelled() {
            log::info!("Processing stopped by user");
            cancelled = true;
            break;
        }

        let source = job.files[job.cursor].clone();
        sink.emit(ProcessingEvent::Started { path: source.clone() });
        log::info!("Processing {:?} ({}/{})", source, job.cursor + 1, total);

        match job.process_one(&source, window, params) {
            Ok(()) => job.processed_count += 1,
            Err(e) => {
                let file_name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source.display().to_string());
                let message = format!("Error processing {}: {}", file_name, e);
                log::warn!("{}", message);
                sink.emit(ProcessingEvent::Error {
                    path: source,
                    message,
                });
            }
        }

        job.cursor += 1;
        sink.emit(ProcessingEvent::Progress {
            index: job.cursor,
            total,
        });
    }

    log::info!("Processed {}/{} files", job.processed_count, total);

    let summary = BatchSummary {
        processed: job.processed_count,
        total,
        cancelled,
    };
    sink.emit(ProcessingEvent::Finished {
        processed: summary.processed,
        total: summary.total,
        cancelled: summary.cancelled,
    });
    summary
}

/// Owns the background worker of at most one run
pub struct BatchController {
    state: Arc<Mutex<BatchState>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<BatchSummary>>,
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState::Idle)),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Validate `config` and start a background run.
    ///
    /// On error nothing is spawned and the state is unchanged.
    pub fn start(&mut self, config: &BatchConfig) -> Result<Receiver<ProcessingEvent>> {
        let mut state = lock_state(&self.state);
        let checked = if *state == BatchState::Running {
            Err(DenoiseError::Configuration("a batch is already running".to_string()))
        } else {
            config.validate()
        };
        if let Err(e) = checked {
            log::error!("Cannot start batch: {}", e);
            return Err(e);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel();

        let worker_state = self.state.clone();
        let worker_cancel = cancel.clone();
        let input_root = config.input_root.clone();
        let output_root = config.output_root.clone();
        let params = config.params.clone();
        let window = config.noise_window();

        let handle = thread::Builder::new()
            .name("batch-denoise".to_string())
            .spawn(move || {
                let mut job = BatchJob::discover(&input_root, &output_root, worker_cancel);
                let summary = run_batch(&mut job, &params, &window, &event_tx);

                // Terminal state is visible before the receiver disconnects
                *lock_state(&worker_state) = if summary.cancelled {
                    BatchState::Cancelled
                } else {
                    BatchState::Completed
                };
                summary
            })?;

        *state = BatchState::Running;
        self.cancel = cancel;
        self.worker = Some(handle);
        log::info!(
            "Batch started: {:?} -> {:?}",
            config.input_root,
            config.output_root
        );

        Ok(event_rx)
    }

    /// Request cancellation. Takes effect before the next file.
    pub fn cancel(&self) {
        if self.state() == BatchState::Running {
            log::info!("Cancellation requested");
        }
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Flag shared with the current run, for cancelling from another thread
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> BatchState {
        *lock_state(&self.state)
    }

    /// Block until the current run exits. `None` if nothing was started or
    /// the worker panicked.
    pub fn wait(&mut self) -> Option<BatchSummary> {
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                log::error!("Batch worker panicked");
                *lock_state(&self.state) = BatchState::Idle;
                None
            }
        }
    }
}

fn lock_state(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    const RATE: u32 = 44100;

    fn write_tone(path: &Path, channels: u16, frames: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let spec = hound::WavSpec {
            channels,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let s = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn quick_config(input: &Path, output: &Path) -> BatchConfig {
        BatchConfig {
            input_root: input.to_path_buf(),
            output_root: output.to_path_buf(),
            noise_start_ms: 0.0,
            noise_end_ms: 50.0,
            params: DenoiseParameters {
                fft_size: 512,
                window_length: 512,
                hop_length: 128,
                ..DenoiseParameters::default()
            },
        }
    }

    /// Records events; optionally raises the cancel flag once a given
    /// Progress index has been reported
    struct Recorder {
        events: RefCell<Vec<ProcessingEvent>>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                events: RefCell::new(Vec::new()),
                cancel_after: None,
            }
        }
    }

    impl EventSink for Recorder {
        fn emit(&self, event: ProcessingEvent) {
            if let (ProcessingEvent::Progress { index, .. }, Some((k, flag))) = (&event, &self.cancel_after) {
                if index == k {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            self.events.borrow_mut().push(event);
        }
    }

    fn progress_indices(events: &[ProcessingEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                ProcessingEvent::Progress { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_background_run_processes_only_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_tone(&input.join("a.wav"), 1, 11025);
        write_tone(&input.join("nested/b.WAV"), 2, 11025);
        write_tone(&input.join("nested/deeper/c.wav"), 1, 11025);
        fs::write(input.join("readme.txt"), "not audio").unwrap();
        fs::write(input.join("nested/cover.png"), [0u8; 16]).unwrap();

        let mut controller = BatchController::new();
        let events: Vec<ProcessingEvent> = controller
            .start(&quick_config(&input, &output))
            .unwrap()
            .iter()
            .collect();
        let summary = controller.wait().unwrap();

        assert_eq!(progress_indices(&events), vec![1, 2, 3]);
        assert!(events.iter().all(|e| !matches!(e, ProcessingEvent::Error { .. })));
        assert_eq!(
            events.last(),
            Some(&ProcessingEvent::Finished {
                processed: 3,
                total: 3,
                cancelled: false
            })
        );
        assert_eq!(
            summary,
            BatchSummary {
                processed: 3,
                total: 3,
                cancelled: false
            }
        );
        assert_eq!(controller.state(), BatchState::Completed);

        assert!(output.join("a.wav").is_file());
        assert!(output.join("nested/b.WAV").is_file());
        assert!(output.join("nested/deeper/c.wav").is_file());
        assert!(!output.join("readme.txt").exists());
    }

    #[test]
    fn test_cancellation_stops_before_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        for name in ["1.wav", "2.wav", "3.wav", "4.wav"] {
            write_tone(&input.join(name), 1, 11025);
        }
        let config = quick_config(&input, &output);

        let cancel = Arc::new(AtomicBool::new(false));
        let mut job = BatchJob::discover(&input, &output, cancel.clone());
        assert_eq!(job.total_count(), 4);
        let sink = Recorder {
            events: RefCell::new(Vec::new()),
            cancel_after: Some((1, cancel)),
        };
        let summary = run_batch(&mut job, &config.params, &config.noise_window(), &sink);
        assert_eq!(job.processed_count(), summary.processed);

        let events = sink.events.into_inner();
        assert_eq!(progress_indices(&events), vec![1]);
        assert!(summary.cancelled);
        assert!(summary.processed <= 2);
        assert_eq!(summary.total, 4);
        assert!(matches!(
            events.last(),
            Some(ProcessingEvent::Finished { cancelled: true, total: 4, .. })
        ));
        assert!(!output.join("2.wav").exists());
    }

    #[test]
    fn test_cancel_stops_background_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        for i in 0..12 {
            write_tone(&input.join(format!("take{:02}.wav", i)), 2, 22050);
        }

        let mut controller = BatchController::new();
        let events = controller.start(&quick_config(&input, &output)).unwrap();
        assert_eq!(controller.state(), BatchState::Running);

        let mut received = Vec::new();
        for event in events.iter() {
            if event == (ProcessingEvent::Progress { index: 1, total: 12 }) {
                controller.cancel();
            }
            received.push(event);
        }
        let summary = controller.wait().unwrap();

        assert!(summary.cancelled);
        assert!(summary.processed >= 1 && summary.processed < 12);
        assert_eq!(controller.state(), BatchState::Cancelled);

        // Every attempted file reported progress, nothing after the stop
        let indices = progress_indices(&received);
        assert_eq!(indices, (1..=summary.processed).collect::<Vec<_>>());
        assert_eq!(
            received.last(),
            Some(&ProcessingEvent::Finished {
                processed: summary.processed,
                total: 12,
                cancelled: true
            })
        );
        let written = path_service::discover_audio_files(&output).len();
        assert_eq!(written, summary.processed);
    }

    #[test]
    fn test_corrupt_file_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        write_tone(&input.join("a.wav"), 1, 11025);
        fs::write(input.join("b.wav"), b"definitely not a RIFF header").unwrap();
        write_tone(&input.join("c.wav"), 1, 11025);
        let config = quick_config(&input, &output);

        let mut job = BatchJob::discover(&input, &output, Arc::new(AtomicBool::new(false)));
        assert_eq!(
            job.files(),
            &[input.join("a.wav"), input.join("b.wav"), input.join("c.wav")]
        );
        let sink = Recorder::new();
        let summary = run_batch(&mut job, &config.params, &config.noise_window(), &sink);

        let events = sink.events.into_inner();
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProcessingEvent::Error { path, message } => Some((path.clone(), message.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, input.join("b.wav"));
        assert!(errors[0].1.starts_with("Error processing b.wav: "));

        assert_eq!(progress_indices(&events), vec![1, 2, 3]);
        assert_eq!(summary.processed, 2);
        assert!(output.join("c.wav").is_file());
    }

    #[test]
    fn test_short_file_fails_window_but_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        // 10 ms, shorter than the 50 ms noise window
        write_tone(&input.join("blip.wav"), 1, 441);
        write_tone(&input.join("take.wav"), 1, 11025);
        let config = quick_config(&input, &output);

        let mut job = BatchJob::discover(&input, &output, Arc::new(AtomicBool::new(false)));
        let sink = Recorder::new();
        let summary = run_batch(&mut job, &config.params, &config.noise_window(), &sink);

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.total, 2);
        let events = sink.events.into_inner();
        assert!(events.iter().any(|e| matches!(
            e,
            ProcessingEvent::Error { message, .. } if message.contains("Invalid noise window")
        )));
    }

    #[test]
    fn test_empty_tree_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();

        let mut controller = BatchController::new();
        let events: Vec<_> = controller
            .start(&quick_config(&input, &dir.path().join("out")))
            .unwrap()
            .iter()
            .collect();

        assert_eq!(
            events,
            vec![ProcessingEvent::Finished {
                processed: 0,
                total: 0,
                cancelled: false
            }]
        );
        assert_eq!(controller.wait().map(|s| s.total), Some(0));
        assert_eq!(controller.state(), BatchState::Completed);
    }

    #[test]
    fn test_invalid_configuration_keeps_controller_idle() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        let valid = quick_config(&input, &output);

        let cases = vec![
            BatchConfig {
                input_root: PathBuf::new(),
                ..valid.clone()
            },
            BatchConfig {
                output_root: PathBuf::new(),
                ..valid.clone()
            },
            BatchConfig {
                noise_start_ms: 100.0,
                noise_end_ms: 100.0,
                ..valid.clone()
            },
            BatchConfig {
                noise_start_ms: -5.0,
                ..valid.clone()
            },
            BatchConfig {
                input_root: dir.path().join("missing"),
                ..valid.clone()
            },
            BatchConfig {
                params: DenoiseParameters {
                    gain_db: 20.0,
                    ..valid.params.clone()
                },
                ..valid.clone()
            },
        ];

        let mut controller = BatchController::new();
        for config in &cases {
            assert!(matches!(
                controller.start(config),
                Err(DenoiseError::Configuration(_))
            ));
            assert_eq!(controller.state(), BatchState::Idle);
        }

        let bad_params = BatchConfig {
            params: DenoiseParameters {
                prop_decrease: 1.5,
                ..valid.params.clone()
            },
            ..valid.clone()
        };
        assert!(matches!(
            controller.start(&bad_params),
            Err(DenoiseError::InvalidDenoiseParameters(_))
        ));

        let bad_filter = BatchConfig {
            params: DenoiseParameters {
                filter_order: 0,
                ..valid.params.clone()
            },
            ..valid
        };
        assert!(matches!(
            controller.start(&bad_filter),
            Err(DenoiseError::InvalidFilterSpec(_))
        ));
        assert_eq!(controller.state(), BatchState::Idle);
        assert!(controller.wait().is_none());
    }

    #[test]
    fn test_second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();

        let mut controller = BatchController::new();
        *lock_state(&controller.state) = BatchState::Running;
        let result = controller.start(&quick_config(&input, &dir.path().join("out")));
        assert!(matches!(result, Err(DenoiseError::Configuration(_))));
        assert_eq!(controller.state(), BatchState::Running);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = BatchConfig {
            input_root: PathBuf::from("/recordings"),
            output_root: PathBuf::from("/cleaned"),
            ..BatchConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["inputRoot"], "/recordings");
        assert_eq!(json["noiseEndMs"], 1000.0);
        assert_eq!(json["params"]["filterOrder"], 6);

        let back: BatchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
