//! Federated instruction execution
//!
//! Instructions that the selector routes to the federated path are rewritten
//! for the workers, broadcast over the input's federation map and combined
//! with the matching aggregation. Results are bound to the output variable
//! in the execution context.

mod aggregate;

pub use aggregate::{execute_aggregate_unary, execute_central_moment};

use crate::context::ExecutionContext;
use crate::errors::{FederatedError, Result};
use crate::instruction::Instruction;
use crate::selector::{select_instruction, FedInstruction, FedKind, Selection};

/// Execute a selected federated instruction.
///
/// Only [`FedKind::AggregateUnary`] and [`FedKind::CentralMoment`] run here;
/// every other kind fails with [`FederatedError::Instruction`].
pub async fn execute_federated(fed: &FedInstruction, ec: &mut ExecutionContext) -> Result<()> {
    match fed.kind {
        FedKind::AggregateUnary => execute_aggregate_unary(fed, ec).await,
        FedKind::CentralMoment => execute_central_moment(fed, ec).await,
        other => Err(FederatedError::Instruction(format!(
            "Federated execution of {:?} instructions is not supported",
            other
        ))),
    }
}

/// Select `inst` and run it if it goes federated.
///
/// Returns the selection so callers can run non-federated instructions on
/// their own backend. Federated kinds other than aggregate-unary and central
/// moment fail with [`FederatedError::Instruction`]; callers that handle
/// them elsewhere should use [`select_instruction`] directly.
pub async fn dispatch(inst: Instruction, ec: &mut ExecutionContext) -> Result<Selection> {
    let selection = select_instruction(inst, ec)?;
    if let Selection::Federated(fed) = &selection {
        execute_federated(fed, ec).await?;
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CacheableData, Data};
    use crate::federation::{
        federate_local_data, FType, FederatedData, FederatedLocalData, FederatedRange,
        FederationMap, IdSequence,
    };
    use crate::matrix::MatrixBlock;
    use crate::worker::FederatedWorkerHandler;
    use std::sync::Arc;

    fn context_with(block: MatrixBlock) -> ExecutionContext {
        let ids = Arc::new(IdSequence::new());
        let mut ec = ExecutionContext::new(5, ids.clone());
        let map = Arc::new(federate_local_data(&ids, block));
        ec.set_variable("X", Data::Matrix(CacheableData::federated(map)));
        ec
    }

    #[tokio::test]
    async fn test_dispatch_aggregate_unary() {
        let block = MatrixBlock::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let mut ec = context_with(block);

        let inst = Instruction::parse("CP°uack+°X·MATRIX·FP64°Y·MATRIX·FP64°1").unwrap();
        let selection = dispatch(inst, &mut ec).await.unwrap();
        assert!(selection.is_federated());

        let y = ec.get_matrix_object("Y").unwrap();
        assert_eq!(
            y.block().unwrap(),
            &MatrixBlock::from_rows(vec![vec![4.0, 6.0]]).unwrap()
        );
    }

    #[tokio::test]
    async fn test_dispatch_central_moment() {
        let block = MatrixBlock::from_rows(vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        let mut ec = context_with(block);

        let inst = Instruction::parse("CP°cm°X·MATRIX·FP64°2·SCALAR·INT64·true°m·SCALAR·FP64").unwrap();
        dispatch(inst, &mut ec).await.unwrap();
        assert!((ec.get_scalar("m").unwrap() - 1.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let mut ec = context_with(MatrixBlock::zeros(2, 2));
        let inst = Instruction::parse("CP°r'°X·MATRIX·FP64°Y·MATRIX·FP64°1").unwrap();
        let err = dispatch(inst.clone(), &mut ec).await.unwrap_err();
        assert!(matches!(err, FederatedError::Instruction(_)));

        // selection alone still reports the federated kind
        match select_instruction(inst, &ec).unwrap() {
            Selection::Federated(fed) => assert_eq!(fed.kind, FedKind::Reorg),
            other => panic!("expected a federated selection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_instruction_is_left_alone() {
        let mut ec = context_with(MatrixBlock::zeros(2, 2));
        ec.set_matrix_output("L", MatrixBlock::zeros(2, 2));
        let inst = Instruction::parse("CP°uak+°L·MATRIX·FP64°s·SCALAR·FP64°1").unwrap();
        let selection = dispatch(inst, &mut ec).await.unwrap();
        assert!(matches!(selection, Selection::Unchanged(_)));
        assert!(ec.get_scalar("s").is_err());
    }

    #[tokio::test]
    async fn test_worker_outputs_are_released() {
        let ids = Arc::new(IdSequence::new());
        let map_id = ids.next_id();
        let block = MatrixBlock::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let handler = Arc::new(FederatedWorkerHandler::with_partition(map_id, block));
        let data: Arc<dyn FederatedData> = Arc::new(FederatedLocalData::from_handler(handler.clone()));
        let map = FederationMap::new(map_id, vec![(FederatedRange::covering(2, 2), data)], FType::Row)
            .unwrap();
        let mut ec = ExecutionContext::new(5, ids);
        ec.set_variable("X", Data::Matrix(CacheableData::federated(Arc::new(map))));

        for text in [
            "CP°uavar°X·MATRIX·FP64°v·SCALAR·FP64°1",
            "CP°uarmean°X·MATRIX·FP64°m·MATRIX·FP64°1",
            "CP°cm°X·MATRIX·FP64°2·SCALAR·INT64·true°c·SCALAR·FP64",
        ] {
            for _ in 0..10 {
                dispatch(Instruction::parse(text).unwrap(), &mut ec).await.unwrap();
            }
        }
        assert_eq!(handler.len(), 1);

        // failed aggregates release their partials too
        let inst = Instruction::parse("CP°ua*°X·MATRIX·FP64°p·SCALAR·FP64°1").unwrap();
        assert!(dispatch(inst, &mut ec).await.is_err());
        assert_eq!(handler.len(), 1);
    }
}
