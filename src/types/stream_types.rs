use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// Envelope carried in the `data` field of a request stream entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct StreamRequest<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

impl<T> StreamRequest<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(service: impl Into<String>, action: impl Into<String>, message: impl Into<String>, data: T) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct StreamResponse<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub status_code: i32,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    pub data: T,
}

impl<T> StreamResponse<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(status_code: i32, success: bool, message: impl Into<String>, data: T) -> Self {
        Self {
            status_code,
            success,
            message: message.into(),
            error_kind: None,
            retryable: false,
            data,
        }
    }

    pub fn from_error(error: &ExchangeError, data: T) -> Self {
        Self {
            status_code: error.status_code(),
            success: false,
            message: error.to_string(),
            error_kind: Some(error.kind().to_string()),
            retryable: error.is_retryable(),
            data,
        }
    }
}
