use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use ort::session::Session;
use ort::value::Tensor;
use reqwest::Url;

use super::{InputTensor, ModelLoader, Predictor, ProbabilityGrid, TensorLayout};
use crate::error::{DecodeError, ModelLoadError};
use crate::log;

const USER_AGENT: &str = "captcha-digits";
const MODEL_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Where the model file comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelSource {
    File(PathBuf),
    Url(Url),
}

impl ModelSource {
    /// Interprets the configured model location.
    ///
    /// `http://` and `https://` values are downloaded, anything else is a path
    /// relative to the executable directory.
    pub fn parse(value: &str) -> Result<Self, ModelLoadError> {
        let trimmed = value.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(trimmed)
                .map_err(|e| ModelLoadError::Other(format!("invalid model URL: {}", e)))?;
            return Ok(Self::Url(url));
        }
        if trimmed.is_empty() {
            return Err(ModelLoadError::Other("no model configured".to_string()));
        }
        Ok(Self::File(crate::paths::resolve_exe_relative(trimmed)))
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{}", url),
        }
    }
}

/// ONNX Runtime backed predictor.
pub struct OnnxPredictor {
    session: Mutex<Session>,
    layout: TensorLayout,
}

impl OnnxPredictor {
    pub fn from_memory(bytes: &[u8], layout: TensorLayout) -> Result<Self, ModelLoadError> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_memory(bytes))
            .map_err(|e| ModelLoadError::Other(format!("failed to build session: {}", e)))?;
        Ok(Self {
            session: Mutex::new(session),
            layout,
        })
    }
}

impl Predictor for OnnxPredictor {
    fn predict(&self, input: &InputTensor) -> Result<ProbabilityGrid, DecodeError> {
        let tensor = Tensor::from_array((input.shape(self.layout), input.data.clone()))
            .map_err(DecodeError::inference)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| DecodeError::Inference(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(DecodeError::inference)?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(DecodeError::inference)?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        ProbabilityGrid::from_output(&dims, data)
    }
}

/// Loads an [`OnnxPredictor`] from the configured source.
pub struct OnnxModelLoader {
    source: ModelSource,
    layout: TensorLayout,
}

impl OnnxModelLoader {
    pub fn new(source: ModelSource, layout: TensorLayout) -> Self {
        Self { source, layout }
    }

    fn read_model_bytes(&self) -> Result<Vec<u8>, ModelLoadError> {
        match &self.source {
            ModelSource::File(path) => fs::read(path).map_err(|e| {
                ModelLoadError::Other(format!("failed to read {}: {}", path.display(), e))
            }),
            ModelSource::Url(url) => download_model(url),
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn Predictor>, ModelLoadError> {
        log(&format!("Loading model from: {}", self.source));
        let bytes = self.read_model_bytes()?;
        let predictor = OnnxPredictor::from_memory(&bytes, self.layout)?;
        log(&format!("Model ready ({} bytes)", bytes.len()));
        Ok(Box::new(predictor))
    }
}

/// Downloads model bytes. Transport and HTTP failures count as network errors.
fn download_model(url: &Url) -> Result<Vec<u8>, ModelLoadError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(MODEL_DOWNLOAD_TIMEOUT_SECS))
        .build()
        .map_err(|e| ModelLoadError::Other(e.to_string()))?;

    let response = client
        .get(url.clone())
        .header("User-Agent", USER_AGENT)
        .send()
        .map_err(|e| ModelLoadError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ModelLoadError::Network(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }

    let bytes = response
        .bytes()
        .map_err(|e| ModelLoadError::Network(e.to_string()))?;

    log(&format!("Downloaded model ({} bytes)", bytes.len()));
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_source() {
        let source = ModelSource::parse("https://example.com/model.onnx").unwrap();
        assert!(matches!(source, ModelSource::Url(_)));
    }

    #[test]
    fn test_parse_path_source_is_exe_relative() {
        match ModelSource::parse("model/captcha.onnx").unwrap() {
            ModelSource::File(path) => {
                assert!(path.starts_with(crate::paths::get_exe_dir()));
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_source_fails() {
        assert!(matches!(
            ModelSource::parse("   "),
            Err(ModelLoadError::Other(_))
        ));
    }

    #[test]
    fn test_missing_model_file_is_generic_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = OnnxModelLoader::new(
            ModelSource::File(dir.path().join("absent.onnx")),
            TensorLayout::Nhwc,
        );
        assert!(matches!(loader.load(), Err(ModelLoadError::Other(_))));
    }
}
