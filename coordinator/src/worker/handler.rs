//! Worker-side request handling
//!
//! A worker keeps its partitions and intermediate results in a variable store
//! keyed by federated id. Values created by `ExecInst` are owned by the
//! session that produced them and dropped on `Clear`; partitions registered
//! through `PutVar` are not session-scoped.

use crate::aggregation::AggregateUnaryOperator;
use crate::errors::{FederatedError, Result};
use crate::instruction::{Instruction, Operand};
use crate::matrix::aggregate::single_pass_variance;
use crate::matrix::MatrixBlock;
use crate::protocol::{FederatedRequest, FederatedResponse, FederatedValue, RequestType};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredVariable {
    value: FederatedValue,
    owner: Option<u64>,
}

/// Serves federated requests against a local variable store
#[derive(Debug)]
pub struct FederatedWorkerHandler {
    worker_id: Uuid,
    variables: Mutex<HashMap<i64, StoredVariable>>,
}

impl Default for FederatedWorkerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FederatedWorkerHandler {
    pub fn new() -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            variables: Mutex::new(HashMap::new()),
        }
    }

    /// Handler pre-loaded with one partition
    pub fn with_partition(var_id: i64, block: MatrixBlock) -> Self {
        let handler = Self::new();
        handler.store(var_id, FederatedValue::Matrix(block), None);
        handler
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.vars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars().is_empty()
    }

    /// Serve one request. Failures are reported in the response.
    pub fn handle(&self, request: FederatedRequest) -> FederatedResponse {
        let id = request.id;
        debug!(
            worker = %self.worker_id,
            request_id = id,
            request_type = ?request.request_type,
            tid = request.tid,
            "Handling federated request"
        );

        let result = match request.request_type {
            RequestType::PutVar => self.put_var(request),
            RequestType::GetVar => self.get_var(&request),
            RequestType::RemoveVar => self.remove_var(&request),
            RequestType::ExecInst => self.exec_inst(&request),
            RequestType::Clear => {
                self.clear(request.tid);
                Ok(Vec::new())
            }
        };

        match result {
            Ok(data) => FederatedResponse::success(id, data),
            Err(e) => {
                warn!(worker = %self.worker_id, request_id = id, error = %e, "Request failed");
                FederatedResponse::failure(id, e.to_string())
            }
        }
    }

    fn vars(&self) -> MutexGuard<'_, HashMap<i64, StoredVariable>> {
        // every write is a single insert, so a poisoned map is still consistent
        self.variables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, id: i64, value: FederatedValue, owner: Option<u64>) {
        self.vars().insert(id, StoredVariable { value, owner });
    }

    fn lookup(&self, id: i64) -> Result<FederatedValue> {
        self.vars()
            .get(&id)
            .map(|var| var.value.clone())
            .ok_or_else(|| FederatedError::Execution(format!("Variable {} not found", id)))
    }

    fn put_var(&self, request: FederatedRequest) -> Result<Vec<FederatedValue>> {
        let value = request.data.into_iter().next().ok_or_else(|| {
            FederatedError::Execution(format!("PutVar {} carries no value", request.id))
        })?;
        self.store(request.id, value, None);
        Ok(Vec::new())
    }

    fn get_var(&self, request: &FederatedRequest) -> Result<Vec<FederatedValue>> {
        let var_id = parse_id(&request.payload)?;
        Ok(vec![self.lookup(var_id)?])
    }

    fn remove_var(&self, request: &FederatedRequest) -> Result<Vec<FederatedValue>> {
        let var_id = parse_id(&request.payload)?;
        let removed = self.vars().remove(&var_id).is_some();
        debug!(var_id, removed, "Removed variable");
        Ok(Vec::new())
    }

    fn clear(&self, tid: u64) {
        let mut vars = self.vars();
        let before = vars.len();
        vars.retain(|_, var| var.owner != Some(tid));
        debug!(tid, dropped = before - vars.len(), "Cleared session variables");
    }

    fn exec_inst(&self, request: &FederatedRequest) -> Result<Vec<FederatedValue>> {
        let inst = Instruction::parse(&request.payload)?;
        let output = inst.output().ok_or_else(|| {
            FederatedError::Instruction(format!("Instruction '{}' has no output", inst))
        })?;
        let output_id = parse_id(&output.name)?;

        let value = if let Some(op) = AggregateUnaryOperator::from_opcode(inst.opcode()) {
            let input = self.resolve_matrix(&inst, 0)?;
            input.aggregate(op)?
        } else if inst.opcode() == "cm" {
            let input = self.resolve_matrix(&inst, 0)?;
            let order = inst
                .operand(1)
                .ok_or_else(|| FederatedError::Instruction("cm requires an order".to_string()))?;
            let order = self.resolve(&order)?.as_scalar()?;
            if order != 2.0 {
                return Err(FederatedError::Execution(format!(
                    "Central moment of order {} is not supported",
                    order
                )));
            }
            FederatedValue::Scalar(single_pass_variance(input.values().iter().copied()))
        } else {
            return Err(FederatedError::Instruction(format!(
                "Worker cannot execute opcode '{}'",
                inst.opcode()
            )));
        };

        self.store(output_id, value.clone(), Some(request.tid));
        Ok(vec![value])
    }

    fn resolve(&self, operand: &Operand) -> Result<FederatedValue> {
        if operand.literal {
            return operand
                .name
                .parse::<f64>()
                .map(FederatedValue::Scalar)
                .map_err(|_| {
                    FederatedError::Instruction(format!("Invalid literal '{}'", operand.name))
                });
        }
        self.lookup(parse_id(&operand.name)?)
    }

    fn resolve_matrix(&self, inst: &Instruction, index: usize) -> Result<MatrixBlock> {
        let operand = inst.operand(index).ok_or_else(|| {
            FederatedError::Instruction(format!("Instruction '{}' lacks input {}", inst, index))
        })?;
        Ok(self.resolve(&operand)?.into_matrix())
    }
}

fn parse_id(name: &str) -> Result<i64> {
    name.parse::<i64>()
        .map_err(|_| FederatedError::Instruction(format!("'{}' is not a federated id", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> FederatedWorkerHandler {
        let block = MatrixBlock::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        FederatedWorkerHandler::with_partition(1, block)
    }

    #[test]
    fn test_exec_aggregate() {
        let h = handler();
        let req = FederatedRequest::exec_inst(5, "CP°uak+°1·MATRIX·FP64°5·SCALAR·FP64°1").with_tid(9);
        let resp = h.handle(req).check().unwrap();
        assert_eq!(resp.data, vec![FederatedValue::Scalar(10.0)]);

        // the result is stored under the output id
        let resp = h.handle(FederatedRequest::get_var(6, 5)).check().unwrap();
        assert_eq!(resp.data, vec![FederatedValue::Scalar(10.0)]);
    }

    #[test]
    fn test_exec_central_moment() {
        let h = handler();
        let req = FederatedRequest::exec_inst(
            7,
            "CP°cm°1·MATRIX·FP64°2·SCALAR·INT64·true°7·SCALAR·FP64",
        );
        let resp = h.handle(req).check().unwrap();
        assert_eq!(resp.data, vec![FederatedValue::Scalar(1.25)]);

        let bad = FederatedRequest::exec_inst(
            8,
            "CP°cm°1·MATRIX·FP64°3·SCALAR·INT64·true°8·SCALAR·FP64",
        );
        assert!(!h.handle(bad).success);
    }

    #[test]
    fn test_missing_variable_fails() {
        let h = handler();
        let req = FederatedRequest::exec_inst(3, "CP°uak+°42·MATRIX·FP64°3·SCALAR·FP64°1");
        let resp = h.handle(req);
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("Variable 42 not found"));
    }

    #[test]
    fn test_unsupported_opcode_fails() {
        let h = handler();
        let req = FederatedRequest::exec_inst(3, "CP°ba+*°1·MATRIX·FP64°1·MATRIX·FP64°3·MATRIX·FP64");
        assert!(!h.handle(req).success);
    }

    #[test]
    fn test_remove_var() {
        let h = handler();
        let exec = FederatedRequest::exec_inst(5, "CP°uak+°1·MATRIX·FP64°5·SCALAR·FP64°1");
        assert!(h.handle(exec).success);
        assert_eq!(h.len(), 2);

        assert!(h.handle(FederatedRequest::remove_var(6, 5)).success);
        assert_eq!(h.len(), 1);
        // removing twice is harmless
        assert!(h.handle(FederatedRequest::remove_var(7, 5)).success);
        assert_eq!(h.len(), 1);

        let mut bad = FederatedRequest::remove_var(8, 1);
        bad.payload = "X".to_string();
        assert!(!h.handle(bad).success);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_put_and_clear() {
        let h = FederatedWorkerHandler::new();
        let put = FederatedRequest::put_var(4, FederatedValue::Scalar(2.0));
        assert!(h.handle(put).success);
        let put = FederatedRequest::put_var(5, FederatedValue::Scalar(1.0)).with_tid(1);
        assert!(h.handle(put).data.is_empty());

        let exec = FederatedRequest::exec_inst(6, "CP°uamax°4·MATRIX·FP64°6·SCALAR·FP64°1").with_tid(1);
        assert!(h.handle(exec).success);
        assert_eq!(h.len(), 3);

        // Clear drops session results but keeps partitions
        assert!(h.handle(FederatedRequest::clear(7).with_tid(1)).success);
        assert_eq!(h.len(), 2);
        assert!(h.handle(FederatedRequest::get_var(8, 4)).success);
        assert!(!h.handle(FederatedRequest::get_var(9, 6)).success);
    }
}
