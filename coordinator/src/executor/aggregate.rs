//! Federated aggregate-unary and central-moment execution

use crate::aggregation::{agg_matrix, agg_scalar, AggregateFunction, AggregateUnaryOperator, Direction};
use crate::context::ExecutionContext;
use crate::errors::{FederatedError, Result};
use crate::federation::{FederationMap, IdSequence};
use crate::instruction::{call_instruction, ExecType, Instruction, Operand};
use crate::protocol::{join_all_responses, FederatedRequest, FederatedValue};
use crate::selector::FedInstruction;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Run an aggregate-unary instruction against federated input
#[instrument(skip_all, fields(opcode = fed.instruction.opcode(), tid = fed.tid))]
pub async fn execute_aggregate_unary(fed: &FedInstruction, ec: &mut ExecutionContext) -> Result<()> {
    let inst = &fed.instruction;
    let op = AggregateUnaryOperator::from_opcode(inst.opcode()).ok_or_else(|| {
        FederatedError::Instruction(format!("'{}' is not an aggregate-unary opcode", inst.opcode()))
    })?;
    let (input, output) = input_and_output(inst)?;
    let map = federated_input(ec, &input)?;

    let mean_op = if op.function == AggregateFunction::CentralMoment {
        let opcode = op.mean_counterpart().opcode().ok_or_else(|| {
            FederatedError::Instruction(format!("No mean counterpart for '{}'", inst.opcode()))
        })?;
        Some(opcode)
    } else {
        None
    };

    let request = call_instruction(inst, &output, &[(&input, map.id())], ec.ids(), fed.tid);
    let responses = map.broadcast(&request);
    let mut worker_outputs = vec![request.id];

    let mean_responses = if let Some(mean_op) = mean_op {
        let mean_inst = inst.clone().with_opcode(mean_op);
        let request = call_instruction(&mean_inst, &output, &[(&input, map.id())], ec.ids(), fed.tid);
        worker_outputs.push(request.id);
        Some(map.broadcast(&request))
    } else {
        None
    };

    let combined = if op.is_full_aggregate() {
        agg_scalar(op, responses, mean_responses, &map)
            .await
            .map(FederatedValue::Scalar)
    } else {
        agg_matrix(op, responses, mean_responses, &map)
            .await
            .map(FederatedValue::Matrix)
    };
    release_worker_outputs(&map, ec.ids(), fed.tid, &worker_outputs).await;

    match combined? {
        FederatedValue::Scalar(value) => {
            info!(output = %output.name, value, "Federated aggregate complete");
            ec.set_scalar_output(output.name, value);
        }
        FederatedValue::Matrix(block) => {
            info!(
                output = %output.name,
                rows = block.rows(),
                cols = block.cols(),
                "Federated aggregate complete"
            );
            ec.set_matrix_output(output.name, block);
        }
    }
    Ok(())
}

/// Run a central-moment instruction (order 2) against federated input
#[instrument(skip_all, fields(tid = fed.tid))]
pub async fn execute_central_moment(fed: &FedInstruction, ec: &mut ExecutionContext) -> Result<()> {
    let inst = &fed.instruction;
    let (input, output) = input_and_output(inst)?;
    let order = inst
        .operand(1)
        .filter(|op| op.literal)
        .and_then(|op| op.name.parse::<f64>().ok());
    if order != Some(2.0) {
        return Err(FederatedError::Instruction(format!(
            "Federated central moment supports literal order 2 only: '{}'",
            inst
        )));
    }
    let map = federated_input(ec, &input)?;

    let request = call_instruction(inst, &output, &[(&input, map.id())], ec.ids(), fed.tid);
    let responses = map.broadcast(&request);

    let mean_inst = Instruction::from_operands(ExecType::Cp, "uamean", &[&input, &output]);
    let mean_request =
        call_instruction(&mean_inst, &output, &[(&input, map.id())], ec.ids(), fed.tid);
    let mean_responses = map.broadcast(&mean_request);

    let op = AggregateUnaryOperator::new(AggregateFunction::CentralMoment, Direction::All);
    let combined = agg_scalar(op, responses, Some(mean_responses), &map).await;
    release_worker_outputs(&map, ec.ids(), fed.tid, &[request.id, mean_request.id]).await;
    let value = combined?;
    info!(output = %output.name, value, "Federated central moment complete");
    ec.set_scalar_output(output.name, value);
    Ok(())
}

/// Drop the per-worker partials once they have been combined; the result
/// lives only on the coordinator.
async fn release_worker_outputs(map: &FederationMap, ids: &IdSequence, tid: u64, var_ids: &[i64]) {
    let pending = var_ids
        .iter()
        .flat_map(|&var_id| {
            let request = FederatedRequest::remove_var(ids.next_id(), var_id).with_tid(tid);
            map.broadcast(&request)
        })
        .collect();
    if let Err(e) = join_all_responses(pending).await {
        warn!(map_id = map.id(), ?var_ids, error = %e, "Failed to release worker outputs");
    }
}

fn input_and_output(inst: &Instruction) -> Result<(Operand, Operand)> {
    match (inst.operand(0), inst.output()) {
        (Some(input), Some(output)) if input != output => Ok((input, output)),
        _ => Err(FederatedError::Instruction(format!(
            "Instruction '{}' needs an input and an output operand",
            inst
        ))),
    }
}

fn federated_input(ec: &ExecutionContext, input: &Operand) -> Result<Arc<FederationMap>> {
    let map = ec
        .cacheable(&input.name)
        .and_then(|data| data.fed_map())
        .cloned()
        .ok_or_else(|| {
            FederatedError::Instruction(format!("Input '{}' is not federated", input.name))
        })?;
    debug!(
        input = %input.name,
        map_id = map.id(),
        partitions = map.len(),
        ftype = %map.ftype(),
        "Resolved federated input"
    );
    Ok(map)
}
