//! JSON-lines wire messages for the serving binary

use crate::types::prediction::PredictionResult;
use crate::types::status::EngineStatus;
use serde::{Deserialize, Serialize};

/// One request line on stdin
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServingRequest {
    Predict {
        #[serde(default)]
        id: Option<String>,
        features: Vec<f64>,
        #[serde(default = "default_true")]
        include_individual: bool,
        #[serde(default = "default_true")]
        include_confidence: bool,
    },
    Batch {
        #[serde(default)]
        id: Option<String>,
        features: Vec<Vec<f64>>,
    },
    Status {
        #[serde(default)]
        id: Option<String>,
    },
    Reload {
        #[serde(default)]
        id: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

impl ServingRequest {
    pub fn id(&self) -> Option<&str> {
        match self {
            ServingRequest::Predict { id, .. }
            | ServingRequest::Batch { id, .. }
            | ServingRequest::Status { id }
            | ServingRequest::Reload { id } => id.as_deref(),
        }
    }
}

/// Per-item outcome inside a batch response
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to a `reload` request
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReply {
    pub version: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Prediction(PredictionResult),
    Batch(Vec<BatchItem>),
    Status(Box<EngineStatus>),
    Reload(ReloadReply),
}

/// One response line on stdout
#[derive(Debug, Clone, Serialize)]
pub struct ServingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServingResponse {
    pub fn success(id: Option<String>, body: ResponseBody) -> Self {
        Self {
            id,
            ok: true,
            result: Some(body),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: impl ToString) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_defaults() {
        let request: ServingRequest =
            serde_json::from_str(r#"{"type":"predict","id":"r1","features":[1.0,2.5]}"#).unwrap();

        assert_eq!(
            request,
            ServingRequest::Predict {
                id: Some("r1".to_string()),
                features: vec![1.0, 2.5],
                include_individual: true,
                include_confidence: true,
            }
        );
        assert_eq!(request.id(), Some("r1"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ServingRequest>(r#"{"type":"train"}"#).is_err());
    }

    #[test]
    fn test_failure_response_shape() {
        let response = ServingResponse::failure(Some("x".to_string()), "no models loaded");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "no models loaded");
        assert!(json.get("result").is_none());
    }
}
