use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub num_labels: usize,
}

/// The model is loaded before the listener is bound, so answering at all
/// means the service is ready.
pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Health> {
    Json(Health {
        status: "Available".into(),
        num_labels: state.inference_service.labels().len(),
    })
}
