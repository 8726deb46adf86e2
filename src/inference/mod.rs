//! Inference boundary.
//!
//! The network is opaque: anything implementing [`Predictor`] maps an
//! [`InputTensor`] to a [`ProbabilityGrid`]. The default backend runs an
//! ONNX model through ONNX Runtime.

pub mod onnx;

pub use onnx::{ModelSource, OnnxModelLoader};

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ModelLoadError};

/// Axis order of the input tensor the model expects.
///
/// With a single channel both orders share the same flat data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// `[1, height, width, 1]`
    #[default]
    Nhwc,
    /// `[1, 1, height, width]`
    Nchw,
}

/// Normalized single-channel image, batch size 1.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub width: usize,
    pub height: usize,
    /// Row-major pixel values in `[0, 1]`.
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn shape(&self, layout: TensorLayout) -> [usize; 4] {
        match layout {
            TensorLayout::Nhwc => [1, self.height, self.width, 1],
            TensorLayout::Nchw => [1, 1, self.height, self.width],
        }
    }
}

/// Per-position class distributions produced by the model.
///
/// Stored flat; every row has exactly `classes` values.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityGrid {
    classes: usize,
    values: Vec<f32>,
}

impl ProbabilityGrid {
    /// Builds a grid from explicit rows. All rows must share one non-zero length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        let classes = rows.first().map(|r| r.len()).unwrap_or(0);
        if classes == 0 {
            return Err(DecodeError::inference("empty prediction"));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != classes) {
            return Err(DecodeError::Inference(format!(
                "row {} has {} values, expected {}",
                bad + 1,
                rows[bad].len(),
                classes
            )));
        }
        Ok(Self {
            classes,
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// Builds a grid from a raw model output.
    ///
    /// Leading unit dimensions are squeezed, so `[1, P, C]`, `[P, C]` and
    /// `[1, 1, P, C]` all give `P` positions of `C` classes. A 1-D output is
    /// a single position.
    pub fn from_output(shape: &[i64], data: &[f32]) -> Result<Self, DecodeError> {
        let mut dims: Vec<usize> = Vec::with_capacity(shape.len());
        for &d in shape {
            let d = usize::try_from(d)
                .map_err(|_| DecodeError::Inference(format!("dynamic output dimension {}", d)))?;
            dims.push(d);
        }
        while dims.len() > 2 && dims[0] == 1 {
            dims.remove(0);
        }

        let (positions, classes) = match dims.as_slice() {
            [classes] => (1, *classes),
            [positions, classes] => (*positions, *classes),
            other => {
                return Err(DecodeError::Inference(format!(
                    "unsupported output shape {:?}",
                    other
                )));
            }
        };

        if classes == 0 || positions * classes != data.len() {
            return Err(DecodeError::Inference(format!(
                "output shape {:?} does not match {} values",
                shape,
                data.len()
            )));
        }

        Ok(Self {
            classes,
            values: data.to_vec(),
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn positions(&self) -> usize {
        self.values.len() / self.classes
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks_exact(self.classes)
    }
}

/// The externally supplied network.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &InputTensor) -> Result<ProbabilityGrid, DecodeError>;
}

/// Produces a ready [`Predictor`]. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Predictor>, ModelLoadError>;
}
