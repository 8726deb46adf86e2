//! GUI application state management.
//!
//! Tracks form input values and decode status for display.

use std::path::PathBuf;
use std::time::Duration;

use crate::acquire::ImageInput;
use crate::decoder::PositionConfidence;
use crate::error::DecodeError;
use crate::i18n::t;
use crate::session::{DecodeOutcome, DecodeRequest};

/// Which step a running decode has reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    LoadingImage,
    LoadingModel,
    Processing,
}

/// Decode status for display in GUI.
#[derive(Clone, Debug, Default)]
pub enum DecodeStatus {
    /// Nothing decoded yet, or the form was reset
    #[default]
    Idle,
    /// A decode is running
    Running(Stage),
    /// The last decode succeeded
    Completed(DecodeOutcome),
    /// The last decode failed
    Failed(DecodeError),
}

impl DecodeStatus {
    /// Text for the result area.
    pub fn result_text(&self) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Running(Stage::LoadingImage) => t("statusLoadingImage"),
            Self::Running(Stage::LoadingModel) => t("statusLoadingModel"),
            Self::Running(Stage::Processing) => t("statusProcessing"),
            Self::Completed(outcome) if outcome.result.text.is_empty() => t("emptyResult"),
            Self::Completed(outcome) => outcome.result.text.clone(),
            Self::Failed(err) => t(err.message_key()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn outcome(&self) -> Option<&DecodeOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// `"12.3 ms"` below one second, `"1.25 s"` above.
pub fn format_timing(elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * 1000.0;
    if ms < 1000.0 {
        format!("{:.1} ms", ms)
    } else {
        format!("{:.2} s", ms / 1000.0)
    }
}

/// `"#2  7  93.4%"`
pub fn format_confidence(confidence: &PositionConfidence) -> String {
    format!(
        "#{}  {}  {:.1}%",
        confidence.position,
        confidence.digit,
        confidence.probability * 100.0
    )
}

/// Comma-separated 1-based positions.
pub fn format_positions(positions: &[usize]) -> String {
    positions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// GUI application state.
#[derive(Debug, Default)]
pub struct GuiState {
    /// URL text field.
    pub url: String,
    /// File path text field; filled by typing or drag-and-drop.
    pub file_path: String,
    /// Grayscale + contrast filter toggle.
    pub enhance: bool,
    pub status: DecodeStatus,
    /// Request behind the current status, reused by Retry.
    pub last_request: Option<DecodeRequest>,
}

impl GuiState {
    pub fn new(enhance: bool) -> Self {
        Self {
            enhance,
            ..Self::default()
        }
    }

    /// Sets the URL and clears the file selection when the URL is non-empty.
    pub fn set_url(&mut self, url: String) {
        if !url.is_empty() {
            self.file_path.clear();
        }
        self.url = url;
    }

    /// Sets the file and clears the URL when a file is selected.
    pub fn set_file(&mut self, path: String) {
        if !path.is_empty() {
            self.url.clear();
        }
        self.file_path = path;
    }

    /// Builds a request from the form fields.
    pub fn request(&self) -> Result<DecodeRequest, DecodeError> {
        let file = self.file_path.trim();
        let file = (!file.is_empty()).then(|| PathBuf::from(file));
        let input = ImageInput::from_form(file.as_deref(), &self.url)?;
        Ok(DecodeRequest {
            input,
            enhance: self.enhance,
        })
    }

    /// Clears result and form.
    pub fn reset(&mut self) {
        self.url.clear();
        self.file_path.clear();
        self.status = DecodeStatus::Idle;
        self.last_request = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeResult;

    #[test]
    fn test_url_and_file_are_exclusive() {
        let mut state = GuiState::default();
        state.set_url("https://example.com/a.png".into());
        state.set_file("/tmp/a.png".into());
        assert!(state.url.is_empty());
        state.set_url("https://example.com/b.png".into());
        assert!(state.file_path.is_empty());
    }

    #[test]
    fn test_clearing_url_keeps_file() {
        let mut state = GuiState::default();
        state.file_path = "a.png".into();
        state.set_url(String::new());
        assert_eq!(state.file_path, "a.png");
    }

    #[test]
    fn test_request_without_input() {
        let state = GuiState::default();
        assert_eq!(state.request(), Err(DecodeError::NoInputSelected));
    }

    #[test]
    fn test_request_carries_enhance_flag() {
        let mut state = GuiState::new(true);
        state.set_file("captcha.png".into());
        let request = state.request().unwrap();
        assert!(request.enhance);
        assert_eq!(request.input, ImageInput::File(PathBuf::from("captcha.png")));
    }

    #[test]
    fn test_empty_result_uses_message() {
        let status = DecodeStatus::Completed(DecodeOutcome {
            result: DecodeResult::default(),
            elapsed: Duration::from_millis(5),
        });
        assert_eq!(status.result_text(), t("emptyResult"));
    }

    #[test]
    fn test_failure_uses_message_key() {
        let status = DecodeStatus::Failed(DecodeError::NoInputSelected);
        assert_eq!(status.result_text(), t("errorNoInput"));
        assert!(status.is_failed());
    }

    #[test]
    fn test_format_timing() {
        assert_eq!(format_timing(Duration::from_micros(12_340)), "12.3 ms");
        assert_eq!(format_timing(Duration::from_millis(1250)), "1.25 s");
    }

    #[test]
    fn test_format_confidence() {
        let c = PositionConfidence {
            position: 2,
            digit: '7',
            probability: 0.934,
        };
        assert_eq!(format_confidence(&c), "#2  7  93.4%");
        assert_eq!(format_positions(&[1, 4]), "1, 4");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = GuiState::default();
        state.set_url("https://example.com/a.png".into());
        state.status = DecodeStatus::Failed(DecodeError::NoInputSelected);
        state.reset();
        assert!(state.url.is_empty());
        assert!(matches!(state.status, DecodeStatus::Idle));
    }
}
