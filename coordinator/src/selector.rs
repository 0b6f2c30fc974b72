//! Federated instruction selection
//!
//! At dispatch time every instruction is checked against the live operands
//! in the [`ExecutionContext`]. When an operand is federated and the
//! instruction family has a federated counterpart, a [`FedInstruction`] is
//! substituted. Control-program and Spark instructions have separate
//! decision tables; everything else passes through unchanged.

use crate::context::{Data, ExecutionContext};
use crate::errors::Result;
use crate::federation::FType;
use crate::instruction::{AuType, ExecType, Instruction, InstructionKind, Operand, VariableOp};
use tracing::debug;

/// Federated instruction families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FedKind {
    AggregateBinary,
    MatrixMultChain,
    Tsmm,
    Reorg,
    CentralMoment,
    QuantileSort,
    AggregateUnary,
    Append,
    QuantilePick,
    Binary,
    ParameterizedBuiltin,
    MultiReturnParameterizedBuiltin,
    MatrixIndexing,
    Variable,
    AggregateTernary,
}

/// An instruction selected for federated execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FedInstruction {
    pub kind: FedKind,
    pub instruction: Instruction,
    /// Caller session the instruction runs under
    pub tid: u64,
}

/// Outcome of instruction selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Run through the federated executor
    Federated(FedInstruction),
    /// Run as a plain CP instruction instead of the original backend
    Downgraded(Instruction),
    /// Keep the original instruction
    Unchanged(Instruction),
}

impl Selection {
    pub fn is_federated(&self) -> bool {
        matches!(self, Selection::Federated(_))
    }
}

/// Select the instruction to execute for `inst`.
///
/// FED and GPU instructions are never re-selected.
pub fn select_instruction(inst: Instruction, ec: &ExecutionContext) -> Result<Selection> {
    let selection = match inst.exec_type() {
        ExecType::Cp => check_and_replace_cp(inst, ec)?,
        ExecType::Spark => check_and_replace_sp(inst, ec)?,
        ExecType::Fed | ExecType::Gpu => Selection::Unchanged(inst),
    };
    if let Selection::Federated(fed) = &selection {
        debug!(
            opcode = fed.instruction.opcode(),
            kind = ?fed.kind,
            tid = fed.tid,
            "Selected federated instruction"
        );
    }
    Ok(selection)
}

/// Decision table for control-program instructions
pub fn check_and_replace_cp(inst: Instruction, ec: &ExecutionContext) -> Result<Selection> {
    let in1 = inst.operand(0);
    let in2 = inst.operand(1);

    let kind = match inst.kind() {
        InstructionKind::AggregateBinary => {
            let both_matrices = is_matrix(&in1) && is_matrix(&in2);
            (both_matrices
                && (federated_as(ec, &in1, FType::Row) || federated_as(ec, &in2, FType::Row)))
            .then_some(FedKind::AggregateBinary)
        }
        InstructionKind::MatrixMultChain => {
            federated(ec, &in1).then_some(FedKind::MatrixMultChain)
        }
        InstructionKind::Tsmm => federated(ec, &in1).then_some(FedKind::Tsmm),
        InstructionKind::Reorg if inst.opcode() == "r'" => {
            federated(ec, &in1).then_some(FedKind::Reorg)
        }
        InstructionKind::CentralMoment => {
            bound_federated_matrix(ec, &in1).then_some(FedKind::CentralMoment)
        }
        InstructionKind::QuantileSort => {
            let single_range = in1
                .as_ref()
                .and_then(|op| ec.cacheable(&op.name))
                .and_then(|c| c.fed_map())
                .is_some_and(|map| map.len() == 1);
            (bound_federated_matrix(ec, &in1) && single_range).then_some(FedKind::QuantileSort)
        }
        InstructionKind::AggregateUnary(AuType::Default) => {
            bound_federated_matrix(ec, &in1).then_some(FedKind::AggregateUnary)
        }
        InstructionKind::Binary | InstructionKind::Append | InstructionKind::QuantilePick => {
            let any_federated = (is_matrix(&in1) && federated(ec, &in1))
                || (is_matrix(&in2) && federated(ec, &in2));
            any_federated.then_some(match inst.kind() {
                InstructionKind::Append => FedKind::Append,
                InstructionKind::QuantilePick => FedKind::QuantilePick,
                _ => FedKind::Binary,
            })
        }
        InstructionKind::ParameterizedBuiltin
            if matches!(
                inst.opcode(),
                "replace" | "rmempty" | "transformdecode" | "transformapply"
            ) =>
        {
            let target_federated = inst
                .param("target")
                .is_some_and(|target| ec.is_federated(target, None));
            target_federated.then_some(FedKind::ParameterizedBuiltin)
        }
        InstructionKind::MultiReturnParameterizedBuiltin => {
            let frame = in1.as_ref().is_some_and(Operand::is_frame);
            (frame && federated(ec, &in1)).then_some(FedKind::MultiReturnParameterizedBuiltin)
        }
        InstructionKind::MatrixIndexing if inst.opcode() == "rightIndex" => {
            (is_matrix(&in1) && federated(ec, &in1)).then_some(FedKind::MatrixIndexing)
        }
        InstructionKind::Variable(VariableOp::Write) => {
            let federated_format = inst
                .operand(2)
                .is_some_and(|format| format.name.contains("federated"));
            (is_matrix(&in1) && federated_format).then_some(FedKind::Variable)
        }
        InstructionKind::Variable(VariableOp::CastAsFrame) => {
            (is_matrix(&in1) && federated(ec, &in1)).then_some(FedKind::Variable)
        }
        InstructionKind::Variable(VariableOp::CastAsMatrix) => {
            let frame = in1.as_ref().is_some_and(Operand::is_frame);
            (frame && federated(ec, &in1)).then_some(FedKind::Variable)
        }
        InstructionKind::AggregateTernary => {
            let both = is_matrix(&in1)
                && federated(ec, &in1)
                && is_matrix(&in2)
                && federated(ec, &in2);
            both.then_some(FedKind::AggregateTernary)
        }
        _ => None,
    };

    match kind {
        Some(kind) => federate_instruction(kind, &inst, ec),
        None => Ok(Selection::Unchanged(inst)),
    }
}

/// Decision table for Spark instructions
pub fn check_and_replace_sp(inst: Instruction, ec: &ExecutionContext) -> Result<Selection> {
    let in1 = inst.operand(0);
    let in1_federated = federated_matrix_variable(ec, &in1);

    let kind = match inst.kind() {
        InstructionKind::MapMM if in1_federated => {
            let (Some(a), Some(b), Some(out)) = (inst.operand(0), inst.operand(1), inst.output())
            else {
                return Ok(Selection::Unchanged(inst));
            };
            let mut fields: Vec<String> = [&a, &b, &out].iter().map(|op| op.to_string()).collect();
            fields.push("1".to_string());
            let rebuilt = Instruction::from_operands(ExecType::Cp, "ba+*", &[]).with_fields(fields);
            return Ok(Selection::Federated(FedInstruction {
                kind: FedKind::AggregateBinary,
                instruction: rebuilt,
                tid: ec.tid(),
            }));
        }
        InstructionKind::CentralMoment if in1_federated => Some(FedKind::CentralMoment),
        InstructionKind::QuantileSort if in1_federated => Some(FedKind::QuantileSort),
        InstructionKind::AggregateUnary(AuType::Default) if in1_federated => {
            Some(FedKind::AggregateUnary)
        }
        InstructionKind::QuantilePick if in1_federated => Some(FedKind::QuantilePick),
        InstructionKind::Append if in1_federated => Some(FedKind::Append),
        InstructionKind::Variable(VariableOp::Write) if in1_federated => {
            // Spark cannot write federated data; run the CP write instead
            let downgraded = Instruction::parse(&inst.to_string())?.with_exec_type(ExecType::Cp);
            debug!(opcode = inst.opcode(), "Downgraded Spark write of federated data");
            return Ok(Selection::Downgraded(downgraded));
        }
        _ => None,
    };

    match kind {
        Some(kind) => federate_instruction(kind, &inst, ec),
        None => Ok(Selection::Unchanged(inst)),
    }
}

fn federate_instruction(
    kind: FedKind,
    inst: &Instruction,
    ec: &ExecutionContext,
) -> Result<Selection> {
    let instruction = Instruction::parse(&inst.to_string())?;
    Ok(Selection::Federated(FedInstruction {
        kind,
        instruction,
        tid: ec.tid(),
    }))
}

fn is_matrix(op: &Option<Operand>) -> bool {
    op.as_ref().is_some_and(Operand::is_matrix)
}

fn federated(ec: &ExecutionContext, op: &Option<Operand>) -> bool {
    op.as_ref().is_some_and(|op| ec.is_federated(&op.name, None))
}

fn federated_as(ec: &ExecutionContext, op: &Option<Operand>, ftype: FType) -> bool {
    op.as_ref()
        .is_some_and(|op| ec.is_federated(&op.name, Some(ftype)))
}

fn bound_federated_matrix(ec: &ExecutionContext, op: &Option<Operand>) -> bool {
    is_matrix(op)
        && op.as_ref().is_some_and(|op| ec.contains_variable(&op.name))
        && federated(ec, op)
}

/// The variable itself, not just the operand, must be a federated matrix
fn federated_matrix_variable(ec: &ExecutionContext, op: &Option<Operand>) -> bool {
    match op.as_ref().and_then(|op| ec.get_variable(&op.name)) {
        Some(Data::Matrix(c)) => c.is_federated(),
        _ => false,
    }
}
