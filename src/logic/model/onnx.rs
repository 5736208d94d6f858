//! ONNX Backend - ONNX Runtime Integration
//!
//! Loads a classifier exported with a single `[1, FEATURE_COUNT]` float input
//! and a probability (or single-logit) output.
//!
//! A sidecar `<model>.json` carrying `LayoutInfo` is checked at load time so a
//! model trained on a different feature layout is refused instead of silently
//! mis-scoring.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;

use super::backend::{InferenceError, ScoringBackend};
use crate::logic::features::{validate_layout, FeatureRecord, LayoutInfo, FEATURE_COUNT};

pub struct OnnxBackend {
    session: Mutex<Session>,
    output_name: String,
    model_path: PathBuf,
    loaded_at: DateTime<Utc>,
}

impl OnnxBackend {
    pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
        log::info!("Loading ONNX model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(model_path.display().to_string()));
        }

        check_sidecar(model_path)?;

        let session = Session::builder()
            .map_err(|e| InferenceError::Load(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Load(format!("optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| InferenceError::Load(e.to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError::Load("model defines no outputs".to_string()))?;

        log::info!("ONNX model loaded (output: {})", output_name);

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            model_path: model_path.to_path_buf(),
            loaded_at: Utc::now(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Path of the layout sidecar for a model file
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("json")
}

fn check_sidecar(model_path: &Path) -> Result<(), InferenceError> {
    let sidecar = sidecar_path(model_path);
    if !sidecar.exists() {
        log::warn!(
            "No layout sidecar for {}; assuming current layout",
            model_path.display()
        );
        return Ok(());
    }

    let content = std::fs::read_to_string(&sidecar)
        .map_err(|e| InferenceError::Load(format!("{}: {}", sidecar.display(), e)))?;
    let info: LayoutInfo = serde_json::from_str(&content)
        .map_err(|e| InferenceError::Load(format!("{}: {}", sidecar.display(), e)))?;

    validate_layout(info.version, info.hash)?;
    Ok(())
}

impl ScoringBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnx"
    }

    fn score(&self, record: &FeatureRecord) -> Result<f32, InferenceError> {
        let input = Array2::<f32>::from_shape_vec((1, FEATURE_COUNT), record.values.to_vec())
            .map_err(|e| InferenceError::Run(format!("array: {}", e)))?;

        let tensor = Value::from_array(input)
            .map_err(|e| InferenceError::Run(format!("tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| InferenceError::InvalidOutput("missing output".to_string()))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::InvalidOutput(e.to_string()))?;

        // Two-class heads emit [p_clean, p_malicious]
        let raw = match data.len() {
            1 => data[0],
            2 => data[1],
            n => return Err(InferenceError::InvalidOutput(format!("{} values", n))),
        };

        if raw.is_nan() {
            return Err(InferenceError::InvalidOutput("NaN".to_string()));
        }

        // Logit heads fall outside [0, 1]
        let p = if (0.0..=1.0).contains(&raw) {
            raw
        } else {
            1.0 / (1.0 + (-raw).exp())
        };
        Ok(p)
    }
}
