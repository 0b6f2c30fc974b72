//! Request/response protocol between coordinator and workers
//!
//! A [`FederatedRequest`] carries an opaque instruction payload (or a value
//! for `PutVar`) and the caller's session id; a [`FederatedResponse`] carries
//! the result values. Both serialize to CBOR for whatever transport carries
//! them.

mod pending;
mod request;
mod response;

pub use pending::{join_all_responses, PendingResponse};
pub use request::{FederatedRequest, RequestType};
pub use response::FederatedResponse;

use crate::errors::{FederatedError, Result};
use crate::matrix::MatrixBlock;
use serde::{Deserialize, Serialize};

/// A single result value returned by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FederatedValue {
    Scalar(f64),
    Matrix(MatrixBlock),
}

impl FederatedValue {
    /// View the value as a matrix; scalars become 1x1 matrices
    pub fn to_matrix(&self) -> MatrixBlock {
        match self {
            FederatedValue::Scalar(v) => MatrixBlock::scalar(*v),
            FederatedValue::Matrix(m) => m.clone(),
        }
    }

    /// Take the value as a matrix; scalars become 1x1 matrices
    pub fn into_matrix(self) -> MatrixBlock {
        match self {
            FederatedValue::Scalar(v) => MatrixBlock::scalar(v),
            FederatedValue::Matrix(m) => m,
        }
    }

    /// Read the value as a scalar; only 1x1 matrices qualify
    pub fn as_scalar(&self) -> Result<f64> {
        match self {
            FederatedValue::Scalar(v) => Ok(*v),
            FederatedValue::Matrix(m) if m.shape() == (1, 1) => Ok(m.get(0, 0)),
            FederatedValue::Matrix(m) => Err(FederatedError::Execution(format!(
                "Expected a scalar result, got a {}x{} matrix",
                m.rows(),
                m.cols()
            ))),
        }
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| FederatedError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn from_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| FederatedError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_as_scalar() {
        assert_eq!(FederatedValue::Scalar(2.5).as_scalar().unwrap(), 2.5);
        let one = FederatedValue::Matrix(MatrixBlock::scalar(4.0));
        assert_eq!(one.as_scalar().unwrap(), 4.0);
        let wide = FederatedValue::Matrix(MatrixBlock::zeros(1, 3));
        assert!(wide.as_scalar().is_err());
    }

    #[test]
    fn test_scalar_to_matrix() {
        assert_eq!(
            FederatedValue::Scalar(7.0).into_matrix(),
            MatrixBlock::scalar(7.0)
        );
    }
}
