use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;

use batch_denoiser::commands::settings::{load_settings, save_settings, DEFAULT_SETTINGS_FILE};
use batch_denoiser::{BatchConfig, BatchController, ProcessingEvent};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch noise reduction for folders of recordings")]
struct Args {
    /// Folder scanned recursively for wav/mp3/ogg/flac files
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Folder receiving the cleaned files, mirroring the input layout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start of the noise-only stretch (ms)
    #[arg(long)]
    noise_start_ms: Option<f64>,
    /// End of the noise-only stretch (ms)
    #[arg(long)]
    noise_end_ms: Option<f64>,

    /// Output gain in dB (0-15)
    #[arg(short, long)]
    gain_db: Option<f32>,
    /// `true` writes 32-bit PCM, `false` 16-bit
    #[arg(long)]
    preserve_high_bit_depth: Option<bool>,

    #[arg(long)]
    filter_low_hz: Option<f32>,
    #[arg(long)]
    filter_high_hz: Option<f32>,
    #[arg(long)]
    filter_order: Option<usize>,

    /// Noise reduction strength (0.0-1.0)
    #[arg(short, long)]
    prop_decrease: Option<f32>,
    #[arg(long)]
    fft_size: Option<usize>,
    #[arg(long)]
    window_length: Option<usize>,
    #[arg(long)]
    hop_length: Option<usize>,

    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the effective settings back to the settings file
    #[arg(long, default_value_t = false)]
    save_config: bool,
    /// Print events as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    json_events: bool,
}

impl Args {
    fn apply_to(&self, config: &mut BatchConfig) {
        if let Some(input) = &self.input {
            config.input_root = input.clone();
        }
        if let Some(output) = &self.output {
            config.output_root = output.clone();
        }
        if let Some(v) = self.noise_start_ms {
            config.noise_start_ms = v;
        }
        if let Some(v) = self.noise_end_ms {
            config.noise_end_ms = v;
        }

        let params = &mut config.params;
        if let Some(v) = self.gain_db {
            params.gain_db = v;
        }
        if let Some(v) = self.preserve_high_bit_depth {
            params.preserve_high_bit_depth = v;
        }
        if let Some(v) = self.filter_low_hz {
            params.filter_low_hz = v;
        }
        if let Some(v) = self.filter_high_hz {
            params.filter_high_hz = v;
        }
        if let Some(v) = self.filter_order {
            params.filter_order = v;
        }
        if let Some(v) = self.prop_decrease {
            params.prop_decrease = v;
        }
        if let Some(v) = self.fft_size {
            params.fft_size = v;
        }
        if let Some(v) = self.window_length {
            params.window_length = v;
        }
        if let Some(v) = self.hop_length {
            params.hop_length = v;
        }
    }
}

/// Typing `stop` or `q` on stdin cancels the run
fn spawn_stop_watcher(cancel: Arc<AtomicBool>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(|l| l.ok()) {
            let command = line.trim().to_lowercase();
            if command == "stop" || command == "q" {
                log::info!("Stop requested, finishing current file");
                cancel.store(true, Ordering::Relaxed);
                break;
            }
        }
    });
}

fn render(event: &ProcessingEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    // Starts and failures are already logged by the worker
    match event {
        ProcessingEvent::Progress { index, total } => {
            println!("[{}/{}] {:.0}%", index, total, *index as f64 * 100.0 / *total as f64);
        }
        ProcessingEvent::Finished {
            processed,
            total,
            cancelled,
        } => {
            let outcome = if *cancelled { "Stopped" } else { "Done" };
            println!("{}: {}/{} files processed", outcome, processed, total);
        }
        ProcessingEvent::Started { .. } | ProcessingEvent::Error { .. } => {}
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    let mut config = load_settings(&settings_path);
    args.apply_to(&mut config);

    if args.save_config {
        if let Err(e) = save_settings(&settings_path, &config) {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let mut controller = BatchController::new();
    let events = match controller.start(&config) {
        Ok(events) => events,
        // Already logged by the controller
        Err(_) => return ExitCode::FAILURE,
    };

    spawn_stop_watcher(controller.cancel_flag());

    for event in events.iter() {
        render(&event, args.json_events);
    }

    match controller.wait() {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    }
}
