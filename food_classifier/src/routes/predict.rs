use crate::{
    inference_service::{InferenceError, Prediction},
    model_service::ModelService,
    routes::PREDICT_ROUTE,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error("No `file` field in the multipart upload")]
    MissingFile,
    #[error("Invalid multipart upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("Prediction task failed: {0}")]
    TaskJoin(#[from] JoinError),
}

impl PredictImageError {
    fn status(&self) -> StatusCode {
        match self {
            PredictImageError::MissingFile => StatusCode::BAD_REQUEST,
            PredictImageError::Multipart(e) => e.status(),
            PredictImageError::Inference(InferenceError::Decode(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PredictImageError::Inference(_) | PredictImageError::TaskJoin(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Prediction failed: {}", self);
        } else {
            tracing::warn!("Rejected upload: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, PredictImageError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            tracing::debug!(
                "Reading upload {:?} ({:?})",
                field.file_name(),
                field.content_type()
            );
            return Ok(field.bytes().await?);
        }
    }

    Err(PredictImageError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, PredictImageError> {
    state.metrics.record_request(PREDICT_ROUTE);

    let image_data = read_file_field(&mut multipart).await?;

    let start = Instant::now();
    let inference_service = state.inference_service.clone();
    let prediction =
        tokio::task::spawn_blocking(move || inference_service.predict(&image_data)).await??;

    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    state
        .metrics
        .record_prediction_duration(elapsed_ms, PREDICT_ROUTE);
    tracing::info!(label = %prediction.label, elapsed_ms, "Prediction served");

    Ok(Json(prediction))
}
