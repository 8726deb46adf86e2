//! Decode session.
//!
//! Holds the process-wide state of the application: the cached model and the
//! busy flag that allows one decode at a time. A decode runs on its own
//! thread and walks Acquisition → Normalize → Inference → Decode in order,
//! reporting progress over a channel.

pub mod model;

pub use model::ModelCache;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::DynamicImage;

use crate::acquire::{self, ImageFetcher, ImageInput};
use crate::config::AppConfig;
use crate::decoder::{self, DIGIT_CLASSES, DecodeResult, DecodeStrategy};
use crate::error::{DecodeError, panic_message};
use crate::inference::ModelLoader;
use crate::normalize;

/// Progress of a running decode, in the order it happens.
#[derive(Debug)]
pub enum PipelineEvent {
    /// The source image decoded; shown as a preview.
    Preview(DynamicImage),
    /// The model is not cached yet and is being loaded.
    LoadingModel,
    /// Model ready, inference starting.
    Processing,
    Finished(Result<DecodeOutcome, DecodeError>),
}

/// Successful decode plus timing.
#[derive(Clone, Debug)]
pub struct DecodeOutcome {
    pub result: DecodeResult,
    /// Time spent in normalization, inference and decoding.
    pub elapsed: Duration,
}

/// Per-run options chosen by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeRequest {
    pub input: ImageInput,
    pub enhance: bool,
}

pub struct Session {
    model: ModelCache,
    busy: AtomicBool,
    config: AppConfig,
}

/// Releases the busy flag when dropped, including during unwinding.
pub struct BusyGuard {
    session: Arc<Session>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::SeqCst);
    }
}

impl Session {
    pub fn new(loader: Box<dyn ModelLoader>, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            model: ModelCache::new(loader),
            busy: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claims the busy flag. Returns `None` if a decode is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<BusyGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        Some(BusyGuard {
            session: self.clone(),
        })
    }

    /// Starts a decode on a worker thread.
    ///
    /// Returns `false` without doing anything if another decode is running.
    /// Always ends with [`PipelineEvent::Finished`], also when the pipeline
    /// panics, and the busy flag is already clear when that event arrives.
    pub fn spawn_decode(
        self: &Arc<Self>,
        request: DecodeRequest,
        fetcher: Arc<dyn ImageFetcher>,
        events: Sender<PipelineEvent>,
    ) -> bool {
        let Some(guard) = self.try_begin() else {
            crate::log("Decode already in progress, ignoring request");
            return false;
        };

        let session = self.clone();
        let spawned = thread::Builder::new()
            .name("decode".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    session.run(&request, fetcher.as_ref(), &mut |event| {
                        let _ = events.send(event);
                    })
                }))
                .unwrap_or_else(|payload| {
                    Err(DecodeError::Inference(format!(
                        "decode panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
                // Free for the next request before the result is shown
                drop(guard);
                match &outcome {
                    Ok(o) => crate::log(&format!(
                        "Decoded '{}' in {} ms",
                        o.result.text,
                        o.elapsed.as_millis()
                    )),
                    Err(e) => crate::log(&format!("Decode failed: {}", e)),
                }
                let _ = events.send(PipelineEvent::Finished(outcome));
            });

        if let Err(e) = spawned {
            crate::log(&format!("Failed to spawn decode thread: {}", e));
            return false;
        }
        true
    }

    /// Runs the full pipeline on the current thread.
    ///
    /// Does not touch the busy flag; callers hold a [`BusyGuard`].
    pub fn run(
        &self,
        request: &DecodeRequest,
        fetcher: &dyn ImageFetcher,
        on_event: &mut dyn FnMut(PipelineEvent),
    ) -> Result<DecodeOutcome, DecodeError> {
        let blob = acquire::acquire(&request.input, fetcher)?;
        crate::log(&format!(
            "Image acquired: {} bytes ({})",
            blob.bytes.len(),
            blob.mime.as_deref().unwrap_or("untyped")
        ));
        let image = acquire::decode_blob(&blob)?;
        on_event(PipelineEvent::Preview(image.clone()));

        if !self.model.is_ready() {
            on_event(PipelineEvent::LoadingModel);
        }
        let predictor = self.model.get()?;
        on_event(PipelineEvent::Processing);

        let started = Instant::now();
        let options = self.config.normalize_options(request.enhance);
        let tensor = normalize::prepare_input(&image, &options);
        let grid = predictor.predict(&tensor)?;
        crate::log(&format!(
            "Model output: {} positions x {} classes",
            grid.positions(),
            grid.classes()
        ));

        if self.config.decode_strategy == DecodeStrategy::ConfidenceGated
            && grid.classes() != DIGIT_CLASSES
        {
            return Err(DecodeError::Inference(format!(
                "model returned {} classes per position, expected {}",
                grid.classes(),
                DIGIT_CLASSES
            )));
        }

        let result = decoder::decode_with(
            self.config.decode_strategy,
            &grid,
            &self.config.decoder,
        );

        Ok(DecodeOutcome {
            result,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::model::tests::CountingLoader;
    use super::*;
    use crate::acquire::tests::{StubFetcher, png_bytes};
    use crate::acquire::ImageBlob;
    use crate::error::{ImageLoadError, ModelLoadError};
    use crate::inference::{InputTensor, Predictor, ProbabilityGrid};
    use reqwest::Url;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, channel};
    use std::sync::Mutex;

    fn row(digit: usize) -> Vec<f32> {
        (0..10).map(|i| if i == digit { 0.91 } else { 0.01 }).collect()
    }

    fn grid(digits: &[usize]) -> ProbabilityGrid {
        ProbabilityGrid::from_rows(digits.iter().map(|&d| row(d)).collect()).unwrap()
    }

    fn stub_fetcher() -> (Arc<StubFetcher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(StubFetcher {
            blob: ImageBlob {
                bytes: png_bytes(120, 40),
                mime: Some("image/png".to_string()),
            },
            calls: calls.clone(),
        });
        (fetcher, calls)
    }

    fn url_request() -> DecodeRequest {
        DecodeRequest {
            input: ImageInput::Url("https://example.com/captcha.png".to_string()),
            enhance: false,
        }
    }

    /// Blocks every fetch until the test releases it.
    struct GatedFetcher {
        calls: Arc<AtomicUsize>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ImageFetcher for GatedFetcher {
        fn fetch(&self, _url: &Url) -> Result<ImageBlob, ImageLoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.lock().unwrap().recv();
            Ok(ImageBlob {
                bytes: png_bytes(10, 10),
                mime: Some("image/png".to_string()),
            })
        }
    }

    #[test]
    fn test_run_decodes_digits() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[4, 2, 4, 2]))),
            AppConfig::default(),
        );
        let (fetcher, calls) = stub_fetcher();
        let mut events = Vec::new();
        let outcome = session
            .run(&url_request(), fetcher.as_ref(), &mut |e| events.push(e))
            .unwrap();

        assert_eq!(outcome.result.text, "4242");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(events[0], PipelineEvent::Preview(_)));
        assert!(matches!(events[1], PipelineEvent::LoadingModel));
        assert!(matches!(events[2], PipelineEvent::Processing));
    }

    #[test]
    fn test_second_run_skips_loading_event() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[1]))),
            AppConfig::default(),
        );
        let (fetcher, _) = stub_fetcher();
        session.run(&url_request(), fetcher.as_ref(), &mut |_| {}).unwrap();

        let mut events = Vec::new();
        session
            .run(&url_request(), fetcher.as_ref(), &mut |e| events.push(e))
            .unwrap();
        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::LoadingModel)));
    }

    #[test]
    fn test_collapse_strategy_from_config() {
        let config = AppConfig {
            decode_strategy: DecodeStrategy::CollapseRepeats,
            ..AppConfig::default()
        };
        let session = Session::new(Box::new(CountingLoader::new(grid(&[1, 1, 2, 2, 3]))), config);
        let (fetcher, _) = stub_fetcher();
        let outcome = session.run(&url_request(), fetcher.as_ref(), &mut |_| {}).unwrap();
        assert_eq!(outcome.result.text, "123");
    }

    #[test]
    fn test_wrong_class_count_is_inference_error() {
        let wide = ProbabilityGrid::from_rows(vec![vec![0.1; 11]]).unwrap();
        let session = Session::new(Box::new(CountingLoader::new(wide)), AppConfig::default());
        let (fetcher, _) = stub_fetcher();
        let err = session.run(&url_request(), fetcher.as_ref(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, DecodeError::Inference(_)));
    }

    #[test]
    fn test_invalid_scheme_rejected_before_model_or_fetch() {
        let loader = CountingLoader::new(grid(&[1]));
        let loads = loader.calls.clone();
        let session = Session::new(Box::new(loader), AppConfig::default());
        let (fetcher, calls) = stub_fetcher();
        let request = DecodeRequest {
            input: ImageInput::Url("ftp://example.com/a.png".to_string()),
            enhance: false,
        };
        let err = session.run(&request, fetcher.as_ref(), &mut |_| {}).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ImageLoad(ImageLoadError::UnsupportedScheme("ftp".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_model_failure_surfaces_and_allows_retry() {
        let mut loader = CountingLoader::new(grid(&[7]));
        loader.failures = 1;
        let session = Session::new(Box::new(loader), AppConfig::default());
        let (fetcher, _) = stub_fetcher();

        let err = session.run(&url_request(), fetcher.as_ref(), &mut |_| {}).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ModelLoad(ModelLoadError::Network("offline".to_string()))
        );
        let outcome = session.run(&url_request(), fetcher.as_ref(), &mut |_| {}).unwrap();
        assert_eq!(outcome.result.text, "7");
    }

    #[test]
    fn test_busy_guard_blocks_reentry_and_releases() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[1]))),
            AppConfig::default(),
        );
        let guard = session.try_begin().expect("first claim should succeed");
        assert!(session.is_busy());
        assert!(session.try_begin().is_none());
        drop(guard);
        assert!(!session.is_busy());
        assert!(session.try_begin().is_some());
    }

    fn wait_finished(rx: &mpsc::Receiver<PipelineEvent>) -> Result<DecodeOutcome, DecodeError> {
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                PipelineEvent::Finished(outcome) => return outcome,
                _ => continue,
            }
        }
    }

    /// Loads a predictor that panics on every call.
    struct PanickingModel;

    struct PanickingPredictor;

    impl Predictor for PanickingPredictor {
        fn predict(&self, _input: &InputTensor) -> Result<ProbabilityGrid, DecodeError> {
            panic!("onnx runtime aborted");
        }
    }

    impl ModelLoader for PanickingModel {
        fn load(&self) -> Result<Box<dyn Predictor>, ModelLoadError> {
            Ok(Box::new(PanickingPredictor))
        }
    }

    #[test]
    fn test_second_decode_while_busy_is_ignored() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[3, 5]))),
            AppConfig::default(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = channel();
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(GatedFetcher {
            calls: calls.clone(),
            release: Mutex::new(release_rx),
        });
        let (tx, rx) = channel();

        assert!(session.spawn_decode(url_request(), fetcher.clone(), tx.clone()));
        assert!(!session.spawn_decode(url_request(), fetcher.clone(), tx.clone()));

        release_tx.send(()).unwrap();
        let finished = wait_finished(&rx);
        assert_eq!(finished.unwrap().result.text, "35");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_flag_clear_when_finished_arrives() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[8]))),
            AppConfig::default(),
        );
        let (fetcher, calls) = stub_fetcher();
        let (tx, rx) = channel();

        assert!(session.spawn_decode(url_request(), fetcher.clone(), tx.clone()));
        assert_eq!(wait_finished(&rx).unwrap().result.text, "8");
        assert!(!session.is_busy());

        // A click right after the result is shown starts a new decode
        assert!(session.spawn_decode(url_request(), fetcher, tx));
        assert_eq!(wait_finished(&rx).unwrap().result.text, "8");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_busy_flag_cleared_after_failure() {
        let session = Session::new(
            Box::new(CountingLoader::new(grid(&[1]))),
            AppConfig::default(),
        );
        let (fetcher, _) = stub_fetcher();
        let (tx, rx) = channel();
        let request = DecodeRequest {
            input: ImageInput::Url("not a url".to_string()),
            enhance: false,
        };
        assert!(session.spawn_decode(request, fetcher, tx));
        let finished = wait_finished(&rx);
        assert!(matches!(finished, Err(DecodeError::ImageLoad(ImageLoadError::InvalidUrl(_)))));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_panic_in_pipeline_still_finishes() {
        let session = Session::new(Box::new(PanickingModel), AppConfig::default());
        let (fetcher, _) = stub_fetcher();
        let (tx, rx) = channel();

        assert!(session.spawn_decode(url_request(), fetcher, tx));
        match wait_finished(&rx) {
            Err(err @ DecodeError::Inference(_)) => {
                assert!(err.to_string().contains("onnx runtime aborted"));
                assert_eq!(err.message_key(), "errorInference");
            }
            other => panic!("expected an inference error, got ok={}", other.is_ok()),
        }
        assert!(!session.is_busy());
    }
}
