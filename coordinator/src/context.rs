//! Execution context: session id, id sequence and live variable bindings

use crate::errors::{FederatedError, Result};
use crate::federation::{FType, FederationMap, IdSequence};
use crate::matrix::MatrixBlock;
use std::collections::HashMap;
use std::sync::Arc;

/// A matrix or frame, held locally, federated, or both
#[derive(Debug, Clone)]
pub struct CacheableData {
    rows: usize,
    cols: usize,
    block: Option<MatrixBlock>,
    fed_map: Option<Arc<FederationMap>>,
}

impl CacheableData {
    pub fn local(block: MatrixBlock) -> Self {
        Self {
            rows: block.rows(),
            cols: block.cols(),
            block: Some(block),
            fed_map: None,
        }
    }

    pub fn federated(fed_map: Arc<FederationMap>) -> Self {
        let (rows, cols) = fed_map.shape();
        Self {
            rows,
            cols,
            block: None,
            fed_map: Some(fed_map),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn block(&self) -> Option<&MatrixBlock> {
        self.block.as_ref()
    }

    pub fn fed_map(&self) -> Option<&Arc<FederationMap>> {
        self.fed_map.as_ref()
    }

    pub fn is_federated(&self) -> bool {
        self.fed_map.is_some()
    }

    /// Federated with the given partitioning
    pub fn is_federated_as(&self, ftype: FType) -> bool {
        self.fed_map.as_ref().is_some_and(|m| m.is_type(ftype))
    }
}

/// A value bound to a variable name
#[derive(Debug, Clone)]
pub enum Data {
    Matrix(CacheableData),
    Frame(CacheableData),
    Scalar(f64),
}

impl Data {
    /// The matrix or frame behind this value
    pub fn cacheable(&self) -> Option<&CacheableData> {
        match self {
            Data::Matrix(c) | Data::Frame(c) => Some(c),
            Data::Scalar(_) => None,
        }
    }

    pub fn is_federated(&self) -> bool {
        self.cacheable().is_some_and(CacheableData::is_federated)
    }
}

/// Per-session execution state
#[derive(Debug)]
pub struct ExecutionContext {
    tid: u64,
    ids: Arc<IdSequence>,
    variables: HashMap<String, Data>,
}

impl ExecutionContext {
    pub fn new(tid: u64, ids: Arc<IdSequence>) -> Self {
        Self {
            tid,
            ids,
            variables: HashMap::new(),
        }
    }

    /// Session id propagated to every federated instruction and request
    pub fn tid(&self) -> u64 {
        self.tid
    }

    pub fn ids(&self) -> &Arc<IdSequence> {
        &self.ids
    }

    pub fn set_variable(&mut self, name: impl Into<String>, data: Data) {
        self.variables.insert(name.into(), data);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Data> {
        self.variables.get(name)
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Data> {
        self.variables.remove(name)
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Bound federated matrix or frame, optionally with a given partitioning
    pub fn is_federated(&self, name: &str, ftype: Option<FType>) -> bool {
        match (self.cacheable(name), ftype) {
            (Some(c), Some(t)) => c.is_federated_as(t),
            (Some(c), None) => c.is_federated(),
            (None, _) => false,
        }
    }

    /// The matrix or frame bound to `name`, if any
    pub fn cacheable(&self, name: &str) -> Option<&CacheableData> {
        self.variables.get(name).and_then(Data::cacheable)
    }

    /// The matrix bound to `name`
    pub fn get_matrix_object(&self, name: &str) -> Result<&CacheableData> {
        match self.variables.get(name) {
            Some(Data::Matrix(c)) => Ok(c),
            Some(_) => Err(FederatedError::Execution(format!(
                "Variable '{}' is not a matrix",
                name
            ))),
            None => Err(FederatedError::Execution(format!(
                "Variable '{}' is not bound",
                name
            ))),
        }
    }

    pub fn set_matrix_output(&mut self, name: impl Into<String>, block: MatrixBlock) {
        self.set_variable(name, Data::Matrix(CacheableData::local(block)));
    }

    pub fn set_scalar_output(&mut self, name: impl Into<String>, value: f64) {
        self.set_variable(name, Data::Scalar(value));
    }

    pub fn get_scalar(&self, name: &str) -> Result<f64> {
        match self.variables.get(name) {
            Some(Data::Scalar(v)) => Ok(*v),
            _ => Err(FederatedError::Execution(format!(
                "Variable '{}' is not a bound scalar",
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::federate_local_data;

    #[test]
    fn test_bindings() {
        let ids = Arc::new(IdSequence::new());
        let mut ec = ExecutionContext::new(7, ids.clone());
        assert_eq!(ec.tid(), 7);

        let map = Arc::new(federate_local_data(&ids, MatrixBlock::zeros(4, 2)));
        ec.set_variable("X", Data::Matrix(CacheableData::federated(map)));
        ec.set_matrix_output("Y", MatrixBlock::zeros(1, 1));
        ec.set_scalar_output("s", 3.0);

        assert!(ec.is_federated("X", None));
        assert!(ec.is_federated("X", Some(FType::Row)));
        assert!(!ec.is_federated("X", Some(FType::Col)));
        assert!(!ec.is_federated("Y", None));
        assert!(!ec.is_federated("missing", None));

        let x = ec.get_matrix_object("X").unwrap();
        assert_eq!((x.rows(), x.cols()), (4, 2));
        assert!(ec.get_matrix_object("s").is_err());
        assert_eq!(ec.get_scalar("s").unwrap(), 3.0);

        ec.remove_variable("s");
        assert!(!ec.contains_variable("s"));
    }
}
