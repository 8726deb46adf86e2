//! Error taxonomy for a single decode invocation.
//!
//! Every error is terminal for the current run only. The GUI and the
//! headless mode turn them into a localized message via [`DecodeError::message_key`].

use std::any::Any;

use thiserror::Error;

/// Errors raised while obtaining or decoding the source image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageLoadError {
    /// The URL text did not parse as an absolute URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Only http and https are fetched.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The server answered with a non-success status.
    #[error("HTTP {0}")]
    HttpStatus(u16),
    /// Declared MIME type is not `image/*`.
    #[error("not an image: {0}")]
    NotAnImage(String),
    /// Local file could not be read.
    #[error("failed to read file: {0}")]
    Io(String),
    /// Bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Errors raised while loading the model.
///
/// The split exists only to pick a more helpful message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    #[error("model download failed: {0}")]
    Network(String),
    #[error("model load failed: {0}")]
    Other(String),
}

/// Top-level error of the decode pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no image selected")]
    NoInputSelected,
    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DecodeError {
    /// Message catalog key used to present this error.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::NoInputSelected => "errorNoInput",
            Self::ImageLoad(_) => "errorLoadImage",
            Self::ModelLoad(ModelLoadError::Network(_)) => "errorModelNetwork",
            Self::ModelLoad(ModelLoadError::Other(_)) => "errorModel",
            Self::Inference(_) => "errorInference",
        }
    }

    pub fn inference(err: impl std::fmt::Display) -> Self {
        Self::Inference(err.to_string())
    }
}

/// Text of a panic payload, for panics caught at a thread or load boundary.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
