use super::ExecType;
use crate::aggregation::AggregateUnaryOperator;

/// Aggregate-unary sub-type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuType {
    /// Numeric reduction over the values
    Default,
    /// Reads only metadata (`nrow`, `ncol`, `length`, ...)
    Meta,
}

/// Variable-instruction sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableOp {
    CreateVar,
    RemoveVar,
    CopyVar,
    MoveVar,
    Write,
    Read,
    /// `castdtf`: matrix to frame
    CastAsFrame,
    /// `castdtm`: frame to matrix
    CastAsMatrix,
    CastAsScalar,
    SetFileName,
}

/// Instruction family, classified from execution type and opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    AggregateBinary,
    MatrixMultChain,
    Tsmm,
    AggregateUnary(AuType),
    AggregateTernary,
    Reorg,
    CentralMoment,
    QuantileSort,
    QuantilePick,
    Append,
    Binary,
    Unary,
    MatrixIndexing,
    ParameterizedBuiltin,
    MultiReturnParameterizedBuiltin,
    Variable(VariableOp),
    /// Spark map-side matrix multiply
    MapMM,
    Other,
}

const META_OPCODES: &[&str] = &["nrow", "ncol", "length", "exists", "lineage"];

const REORG_OPCODES: &[&str] = &["r'", "rev", "rdiag", "rsort"];

const BINARY_OPCODES: &[&str] = &[
    "+", "-", "*", "/", "%%", "%/%", "^", "1-*", "^2", "*2", "max", "min", "==", "!=", "<", ">",
    "<=", ">=", "&&", "||", "xor", "log", "solve", "dropInvalidType", "valueSwap",
];

const UNARY_OPCODES: &[&str] = &[
    "!", "abs", "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "sign",
    "sqrt", "exp", "round", "ceil", "floor", "ucumk+", "ucum*", "ucummin", "ucummax", "isna",
    "isnan", "isinf", "sigmoid", "sprop",
];

const PARAM_BUILTIN_OPCODES: &[&str] = &[
    "replace",
    "rmempty",
    "transformdecode",
    "transformapply",
    "groupedagg",
    "rexpand",
    "lowertri",
    "uppertri",
    "tokenize",
];

const SPARK_BINARY_OPCODES: &[&str] = &["map+", "map-", "map*", "map/", "mapmappend", "rappend"];

impl VariableOp {
    fn from_opcode(opcode: &str) -> Option<Self> {
        Some(match opcode {
            "createvar" => VariableOp::CreateVar,
            "rmvar" | "rmfilevar" => VariableOp::RemoveVar,
            "cpvar" => VariableOp::CopyVar,
            "mvvar" => VariableOp::MoveVar,
            "write" => VariableOp::Write,
            "read" => VariableOp::Read,
            "castdtf" => VariableOp::CastAsFrame,
            "castdtm" => VariableOp::CastAsMatrix,
            "castdts" => VariableOp::CastAsScalar,
            "setfilename" => VariableOp::SetFileName,
            _ => return None,
        })
    }
}

impl InstructionKind {
    /// Classify an instruction by execution type and opcode.
    ///
    /// FED and GPU instructions share the control-program opcode table.
    pub fn classify(exec_type: ExecType, opcode: &str) -> Self {
        match exec_type {
            ExecType::Spark => Self::classify_spark(opcode),
            ExecType::Cp | ExecType::Fed | ExecType::Gpu => Self::classify_cp(opcode),
        }
    }

    fn classify_cp(opcode: &str) -> Self {
        if AggregateUnaryOperator::is_opcode(opcode) {
            return InstructionKind::AggregateUnary(AuType::Default);
        }
        if let Some(op) = VariableOp::from_opcode(opcode) {
            return InstructionKind::Variable(op);
        }
        match opcode {
            "ba+*" => InstructionKind::AggregateBinary,
            "mmchain" => InstructionKind::MatrixMultChain,
            "tsmm" => InstructionKind::Tsmm,
            "cm" => InstructionKind::CentralMoment,
            "qsort" => InstructionKind::QuantileSort,
            "qpick" => InstructionKind::QuantilePick,
            "append" => InstructionKind::Append,
            "rightIndex" | "leftIndex" => InstructionKind::MatrixIndexing,
            "transformencode" => InstructionKind::MultiReturnParameterizedBuiltin,
            "tak+*" | "tack+*" => InstructionKind::AggregateTernary,
            op if META_OPCODES.contains(&op) => InstructionKind::AggregateUnary(AuType::Meta),
            op if REORG_OPCODES.contains(&op) => InstructionKind::Reorg,
            op if PARAM_BUILTIN_OPCODES.contains(&op) => InstructionKind::ParameterizedBuiltin,
            op if BINARY_OPCODES.contains(&op) => InstructionKind::Binary,
            op if UNARY_OPCODES.contains(&op) => InstructionKind::Unary,
            _ => InstructionKind::Other,
        }
    }

    fn classify_spark(opcode: &str) -> Self {
        if AggregateUnaryOperator::is_opcode(opcode) {
            return InstructionKind::AggregateUnary(AuType::Default);
        }
        match opcode {
            "mapmm" => InstructionKind::MapMM,
            "cm" => InstructionKind::CentralMoment,
            "qsort" => InstructionKind::QuantileSort,
            "qpick" => InstructionKind::QuantilePick,
            "galignedappend" | "gappend" => InstructionKind::Append,
            "write" => InstructionKind::Variable(VariableOp::Write),
            "r'" => InstructionKind::Reorg,
            op if SPARK_BINARY_OPCODES.contains(&op) || BINARY_OPCODES.contains(&op) => {
                InstructionKind::Binary
            }
            op if UNARY_OPCODES.contains(&op) => InstructionKind::Unary,
            _ => InstructionKind::Other,
        }
    }
}
