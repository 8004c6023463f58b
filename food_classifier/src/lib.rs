mod inference_service;
mod labels;
mod model_service;
mod ort_service;
mod preprocessing;
mod routes;
mod server;
mod telemetry;

pub mod config;

pub use inference_service::{argmax, InferenceError, InferenceService, Prediction};
pub use labels::{LabelMap, LabelMapError};
pub use model_service::{ModelService, ModelServiceError};
pub use ort_service::OrtModelService;
pub use preprocessing::{ImagePreprocessor, PreprocessorError, PreprocessorParams};
pub use server::start_server;
