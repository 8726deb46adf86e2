//! Captcha Digits
//!
//! Reads a digit CAPTCHA from a URL or local file with an ONNX model.
//! Runs as a small egui window, or once from the command line with
//! `--decode <url-or-path> [--json]`.

mod acquire;
mod config;
mod decoder;
mod error;
mod gui;
mod i18n;
mod inference;
mod normalize;
mod paths;
mod session;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use clap::Parser;

use acquire::{HttpFetcher, ImageFetcher, ImageInput};
use inference::{ModelSource, OnnxModelLoader};
use session::{DecodeRequest, Session};

const LOG_FILE: &str = "captcha_digits.log";

/// Logs a message to both stderr and log file with timestamp.
///
/// Stdout is reserved for headless decode output.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    eprint!("{}", line);
    let log_path = paths::get_logs_dir().join(LOG_FILE);
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
}

/// Command-line options. Without `--decode` the GUI starts.
#[derive(Parser, Debug)]
#[command(name = "captcha-digits", version, about = "Reads digit CAPTCHAs with an ONNX model")]
struct Cli {
    /// Decode one image URL or file path and print the result
    #[arg(long, value_name = "URL_OR_PATH")]
    decode: Option<String>,
    /// Print the decode result as JSON
    #[arg(long, requires = "decode")]
    json: bool,
}

fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = error::panic_message(panic_info.payload());
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        let log_msg = format!("[PANIC]{} {}\n", location, msg);
        eprintln!("{}", log_msg);
        let log_path = paths::get_logs_dir().join(LOG_FILE);
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            let _ = file.write_all(log_msg.as_bytes());
        }
    }));

    let cli = Cli::parse();

    // Ensure output directories exist
    paths::ensure_directories().context("failed to create logs directory")?;

    config::init_config();
    let config = config::get_config();
    i18n::init_catalog(&i18n::detect_locale(config.locale.as_deref()));

    let source = ModelSource::parse(&config.model)
        .with_context(|| format!("invalid model location '{}'", config.model))?;
    log(&format!("Model source: {}", source));
    let loader = OnnxModelLoader::new(source, config.tensor_layout);
    let session = Session::new(Box::new(loader), config.clone());
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(
        HttpFetcher::new(config.request_timeout()).context("failed to build HTTP client")?,
    );

    match cli.decode {
        Some(target) => run_headless(&session, fetcher.as_ref(), &target, cli.json),
        None => {
            log("Starting GUI application...");
            match gui::run_gui(session, fetcher) {
                Ok(()) => {
                    log("GUI application exited normally");
                    Ok(())
                }
                Err(e) => {
                    log(&format!("GUI error: {}", e));
                    Err(anyhow!("GUI error: {}", e))
                }
            }
        }
    }
}

/// Decodes one image and prints the result.
fn run_headless(
    session: &Arc<Session>,
    fetcher: &dyn ImageFetcher,
    target: &str,
    json: bool,
) -> Result<()> {
    let Some(_guard) = session.try_begin() else {
        bail!("a decode is already running");
    };

    let request = DecodeRequest {
        input: ImageInput::from_arg(target),
        enhance: session.config().enhance_contrast,
    };

    let outcome = match session.run(&request, fetcher, &mut |_| {}) {
        Ok(outcome) => outcome,
        Err(err) => {
            log(&format!("Decode failed: {}", err));
            eprintln!("{}", i18n::t(err.message_key()));
            bail!(err);
        }
    };

    if json {
        let body = serde_json::to_string_pretty(&outcome.result)?;
        println!("{}", body);
        return Ok(());
    }

    if outcome.result.text.is_empty() {
        println!("{}", i18n::t("emptyResult"));
    } else {
        println!("{}", outcome.result.text);
    }
    if session.config().show_timing {
        println!(
            "{}: {}",
            i18n::t("labelTiming"),
            gui::state::format_timing(outcome.elapsed)
        );
    }
    if !outcome.result.low_confidence_positions.is_empty() {
        println!(
            "{}: {}",
            i18n::t("labelLowConfidence"),
            gui::state::format_positions(&outcome.result.low_confidence_positions)
        );
    }
    if session.config().show_confidences {
        for confidence in &outcome.result.confidences {
            println!("{}", gui::state::format_confidence(confidence));
        }
    }
    Ok(())
}
