//! Request dispatch for the JSON-lines serving loop

use crate::models::inference::InferenceEngine;
use crate::types::request::{BatchItem, ReloadReply, ResponseBody, ServingRequest, ServingResponse};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Decode one stdin line; a bad line yields an error response instead of a request
pub fn parse_line(line: &str) -> Result<ServingRequest, ServingResponse> {
    serde_json::from_str(line).map_err(|e| {
        warn!(error = %e, "Failed to deserialize request");
        ServingResponse::failure(None, format!("invalid request: {}", e))
    })
}

/// Run one request against the engine. Blocking.
pub fn handle_request(
    engine: &InferenceEngine,
    request: ServingRequest,
    batch_limit: usize,
) -> ServingResponse {
    match request {
        ServingRequest::Predict {
            id,
            features,
            include_individual,
            include_confidence,
        } => match engine.predict(&features, include_individual, include_confidence) {
            Ok(result) => {
                debug!(
                    request_id = ?id,
                    prediction = result.prediction,
                    interval = ?result.interval_width(),
                    version = %result.model_version,
                    "Prediction served"
                );
                ServingResponse::success(id, ResponseBody::Prediction(result))
            }
            Err(e) => {
                warn!(request_id = ?id, error = %e, "Prediction failed");
                ServingResponse::failure(id, e)
            }
        },

        ServingRequest::Batch { id, features } => {
            if features.len() > batch_limit {
                return ServingResponse::failure(
                    id,
                    format!(
                        "batch of {} exceeds limit of {}",
                        features.len(),
                        batch_limit
                    ),
                );
            }

            let items = engine
                .batch_predict(&features)
                .into_iter()
                .map(|outcome| match outcome {
                    Ok(result) => BatchItem {
                        ok: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(e) => BatchItem {
                        ok: false,
                        result: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect();
            ServingResponse::success(id, ResponseBody::Batch(items))
        }

        ServingRequest::Status { id } => {
            ServingResponse::success(id, ResponseBody::Status(Box::new(engine.status())))
        }

        ServingRequest::Reload { id } => match engine.force_reload() {
            Ok(generation) => {
                info!(request_id = ?id, version = %generation.version(), "Reload requested");
                ServingResponse::success(
                    id,
                    ResponseBody::Reload(ReloadReply {
                        version: generation.version().to_string(),
                        models: generation.model_names(),
                    }),
                )
            }
            Err(e) => ServingResponse::failure(id, e),
        },
    }
}

/// Write each response as one JSON line until the channel closes.
///
/// Stops at the first write or flush error and drops the receiver, so later
/// sends fail instead of queueing. Returns the number of lines written.
pub async fn write_responses<W>(mut rx: mpsc::Receiver<ServingResponse>, mut out: W) -> usize
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                error!(request_id = ?response.id, error = %e, "Failed to serialize response");
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = out.write_all(line.as_bytes()).await {
            error!(request_id = ?response.id, error = %e, "Failed to write response");
            break;
        }
        if let Err(e) = out.flush().await {
            error!(request_id = ?response.id, error = %e, "Failed to flush response");
            break;
        }
        written += 1;
    }
    written
}
