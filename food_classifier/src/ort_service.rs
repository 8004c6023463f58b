use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelService, ModelServiceError},
};
use ndarray::{ArrayView4, ArrayViewD, Axis};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the same model file.
///
/// `Session::run` needs exclusive access, so each session sits behind its own
/// mutex and requests are spread round-robin.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelServiceError> {
        let num_instances = model_config.num_instances;
        let model_path = model_config.get_path();
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelServiceError::Load(format!("{:?}: {}", model_path, e)))?;

        let output_name = model_config.output_name.clone();
        if let Some(session) = sessions.first() {
            let session = session
                .lock()
                .map_err(|e| ModelServiceError::SessionPoisoned(e.to_string()))?;
            if !session.outputs.iter().any(|output| output.name == output_name) {
                let available: Vec<&str> =
                    session.outputs.iter().map(|o| o.name.as_str()).collect();
                return Err(ModelServiceError::Load(format!(
                    "model has no output named `{}` (available: {:?})",
                    output_name, available
                )));
            }
        }

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
        })
    }
}

impl ModelService for OrtModelService {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelServiceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelServiceError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelServiceError::InputTensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelServiceError::Inference(e.to_string()))?;

        let output_error = |reason: String| ModelServiceError::Output {
            name: self.output_name.clone(),
            reason,
        };

        // output name was checked against the session when the pool was built
        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| output_error(e.to_string()))?;

        let logits = ArrayViewD::from_shape(shape.to_ixdyn(), data)
            .map_err(|e| output_error(e.to_string()))?;

        class_scores(logits).map_err(output_error)
    }
}

/// Scores of the single image in a `[1, num_classes]` logits tensor.
fn class_scores(logits: ArrayViewD<'_, f32>) -> Result<Vec<f32>, String> {
    if logits.ndim() != 2 || logits.len_of(Axis(0)) != 1 {
        return Err(format!(
            "expected shape [1, num_classes], got {:?}",
            logits.shape()
        ));
    }

    Ok(logits.index_axis(Axis(0), 0).iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::get_configuration, inference_service::InferenceService, labels::LabelMap,
        preprocessing::ImagePreprocessor,
    };

    #[test]
    fn test_class_scores_single_image() {
        let logits = ndarray::arr2(&[[0.5_f32, -1.0, 2.0]]).into_dyn();

        let scores = class_scores(logits.view()).unwrap();

        assert_eq!(scores, vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_class_scores_rejects_batch_of_two() {
        let logits = ndarray::Array::<f32, _>::zeros((2, 3)).into_dyn();

        let err = class_scores(logits.view()).unwrap_err();

        assert!(err.contains("[2, 3]"));
    }

    #[test]
    fn test_class_scores_rejects_three_dimensions() {
        let logits = ndarray::Array::<f32, _>::zeros((1, 4, 3)).into_dyn();

        let err = class_scores(logits.view()).unwrap_err();

        assert!(err.contains("[1, 4, 3]"));
    }

    /// Needs the exported model under `configuration/` paths plus
    /// `FOOD_GOLDEN_IMAGE` and `FOOD_GOLDEN_LABEL` pointing at a pinned fixture.
    #[test]
    #[ignore]
    fn test_golden_image_prediction() {
        let image_path = std::env::var("FOOD_GOLDEN_IMAGE").unwrap();
        let expected = std::env::var("FOOD_GOLDEN_LABEL").unwrap();
        let config = get_configuration().unwrap();

        let inference_service = InferenceService::new(
            OrtModelService::new(&config.model).unwrap(),
            ImagePreprocessor::new(&config.preprocessing).unwrap(),
            LabelMap::new(&config.labels).unwrap(),
        );
        let image_data = std::fs::read(image_path).unwrap();

        let first = inference_service.predict(&image_data).unwrap();
        let second = inference_service.predict(&image_data).unwrap();

        assert_eq!(first.label, expected);
        assert_eq!(first, second);
    }
}
