use super::{from_cbor, to_cbor, FederatedValue};
use crate::errors::{FederatedError, Result};
use serde::{Deserialize, Serialize};

/// Envelope returned by a worker for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedResponse {
    /// Id of the request this answers
    pub id: i64,
    /// Whether the worker served the request
    pub success: bool,
    /// Result values (one for scalar and matrix instructions)
    pub data: Vec<FederatedValue>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl FederatedResponse {
    pub fn success(id: i64, data: Vec<FederatedValue>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Successful response without result values
    pub fn empty(id: i64) -> Self {
        Self::success(id, Vec::new())
    }

    pub fn failure(id: i64, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Turn a failed response into a worker error
    pub fn check(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(FederatedError::Worker(format!(
                "request {} failed: {}",
                self.id,
                self.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    /// Take the first result value of a successful response
    pub fn into_first(self) -> Result<FederatedValue> {
        let id = self.id;
        self.data
            .into_iter()
            .next()
            .ok_or_else(|| FederatedError::Worker(format!("response {} carries no data", id)))
    }

    /// Serialize to CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}
