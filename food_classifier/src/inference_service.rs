use crate::{
    labels::LabelMap,
    model_service::{ModelService, ModelServiceError},
    preprocessing::ImagePreprocessor,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Model error: {0}")]
    Model(#[from] ModelServiceError),
    #[error("Model returned no class scores")]
    EmptyScores,
    #[error("Predicted class {0} has no label")]
    UnknownClass(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
}

/// Index and score of the highest class score. Ties resolve to the lowest
/// index.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
}

/// Decode, preprocess, forward, argmax, label lookup. Built once at startup
/// and cloned into every request; nothing in here is mutated afterwards.
#[derive(Clone)]
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    preprocessor: Arc<ImagePreprocessor>,
    labels: Arc<LabelMap>,
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M, preprocessor: ImagePreprocessor, labels: LabelMap) -> Self {
        Self {
            model_service: Arc::new(model_service),
            preprocessor: Arc::new(preprocessor),
            labels: Arc::new(labels),
        }
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn predict(&self, image_data: &[u8]) -> Result<Prediction, InferenceError> {
        let image = ImagePreprocessor::decode(image_data)?;
        tracing::debug!(
            "Decoded {}x{} image from {} bytes",
            image.width(),
            image.height(),
            image_data.len()
        );

        let input = self.preprocessor.preprocess(&image);
        let scores = self.model_service.forward(input.view())?;

        let (class_id, score) = argmax(&scores).ok_or(InferenceError::EmptyScores)?;
        let label = self
            .labels
            .get(class_id)
            .ok_or(InferenceError::UnknownClass(class_id))?;

        tracing::debug!(
            "Predicted class_id={}, label={}, score={:.3}",
            class_id,
            label,
            score
        );

        Ok(Prediction {
            label: label.to_string(),
        })
    }
}
