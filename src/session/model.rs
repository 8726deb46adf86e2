//! Lazily loaded, shared model handle.
//!
//! `Unloaded → Loading → Ready`, back to `Unloaded` when a load fails so the
//! next request retries. Callers arriving during `Loading` wait for that load
//! and share its outcome. A loader that panics counts as a failed load.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{ModelLoadError, panic_message};
use crate::inference::{ModelLoader, Predictor};

enum LoadState {
    Unloaded,
    Loading { attempt: u64 },
    Ready(Arc<dyn Predictor>),
}

struct Inner {
    state: LoadState,
    attempts: u64,
    /// Outcome of the most recent failed attempt, for waiters of that attempt.
    last_failure: Option<(u64, ModelLoadError)>,
}

pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    inner: Mutex<Inner>,
    loaded: Condvar,
}

impl ModelCache {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            inner: Mutex::new(Inner {
                state: LoadState::Unloaded,
                attempts: 0,
                last_failure: None,
            }),
            loaded: Condvar::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| matches!(inner.state, LoadState::Ready(_)))
            .unwrap_or(false)
    }

    /// Returns the model, loading it if needed.
    pub fn get(&self) -> Result<Arc<dyn Predictor>, ModelLoadError> {
        let mut inner = self.lock()?;

        loop {
            let waiting_on = match &inner.state {
                LoadState::Ready(predictor) => return Ok(predictor.clone()),
                LoadState::Loading { attempt } => *attempt,
                LoadState::Unloaded => break,
            };
            inner = self
                .loaded
                .wait_while(inner, |i| {
                    matches!(i.state, LoadState::Loading { attempt } if attempt == waiting_on)
                })
                .map_err(poisoned)?;
            if let Some((failed, err)) = &inner.last_failure {
                if *failed == waiting_on {
                    return Err(err.clone());
                }
            }
        }

        inner.attempts += 1;
        let attempt = inner.attempts;
        inner.state = LoadState::Loading { attempt };
        drop(inner);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load()))
            .unwrap_or_else(|payload| {
                Err(ModelLoadError::Other(format!(
                    "model loader panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let mut inner = self.lock()?;
        let result = match outcome {
            Ok(predictor) => {
                let predictor: Arc<dyn Predictor> = Arc::from(predictor);
                inner.state = LoadState::Ready(predictor.clone());
                inner.last_failure = None;
                Ok(predictor)
            }
            Err(err) => {
                crate::log(&format!("Model load failed: {}", err));
                inner.state = LoadState::Unloaded;
                inner.last_failure = Some((attempt, err.clone()));
                Err(err)
            }
        };
        drop(inner);
        self.loaded.notify_all();
        result
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ModelLoadError> {
        self.inner.lock().map_err(poisoned)
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> ModelLoadError {
    ModelLoadError::Other(format!("model state lock poisoned: {}", err))
}
