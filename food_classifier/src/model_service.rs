use ndarray::ArrayView4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelServiceError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("Failed to build input tensor: {0}")]
    InputTensor(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Failed to extract output `{name}`: {reason}")]
    Output { name: String, reason: String },
}

/// Forward pass of an image classifier.
///
/// Implementations take a preprocessed `[1, 3, H, W]` batch and return one
/// score per class. They must not keep state between calls.
pub trait ModelService: Send + Sync + Clone + 'static {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelServiceError>;
}
