//! Instruction text encoding
//!
//! Instructions travel as delimiter-separated text:
//!
//! ```text
//! CP°uark+°_mVar7·MATRIX·FP64°_mVar8·MATRIX·FP64°8
//! └┬┘ └─┬─┘ └───────┬───────┘ └───────┬───────┘ └┬┘
//! exec opcode     input             output     extra
//! ```
//!
//! Operands are `name·DATATYPE·VALUETYPE[·literal]`, parameterized builtins
//! use `key=value` fields. [`Instruction`] keeps every field verbatim so
//! parsing and formatting round-trip bit-for-bit.

mod kind;
mod rewrite;

pub use kind::{AuType, InstructionKind, VariableOp};
pub use rewrite::call_instruction;

use crate::errors::{FederatedError, Result};
use std::fmt;

/// Separator between instruction fields
pub const OPERAND_DELIMITER: char = '°';
/// Separator between an operand name and its data type
pub const DATATYPE_PREFIX: char = '·';
/// Separator between an operand data type and its value type
pub const VALUETYPE_PREFIX: char = '·';
/// Separator before an operand's literal flag
pub const LITERAL_PREFIX: char = '·';

/// Backend an instruction is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecType {
    /// Local control program
    Cp,
    Spark,
    Fed,
    Gpu,
}

impl ExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Cp => "CP",
            ExecType::Spark => "SPARK",
            ExecType::Fed => "FED",
            ExecType::Gpu => "GPU",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "CP" => Ok(ExecType::Cp),
            "SPARK" => Ok(ExecType::Spark),
            "FED" => Ok(ExecType::Fed),
            "GPU" => Ok(ExecType::Gpu),
            other => Err(FederatedError::Instruction(format!(
                "Unknown execution type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Matrix,
    Frame,
    Scalar,
    List,
    Tensor,
    Unknown,
}

impl DataType {
    fn parse(s: &str) -> Self {
        match s {
            "MATRIX" => DataType::Matrix,
            "FRAME" => DataType::Frame,
            "SCALAR" => DataType::Scalar,
            "LIST" => DataType::List,
            "TENSOR" => DataType::Tensor,
            _ => DataType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Matrix => "MATRIX",
            DataType::Frame => "FRAME",
            DataType::Scalar => "SCALAR",
            DataType::List => "LIST",
            DataType::Tensor => "TENSOR",
            DataType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Fp64,
    Fp32,
    Int64,
    Int32,
    Boolean,
    String,
    Unknown,
}

impl ValueType {
    fn parse(s: &str) -> Self {
        match s {
            "FP64" => ValueType::Fp64,
            "FP32" => ValueType::Fp32,
            "INT64" => ValueType::Int64,
            "INT32" => ValueType::Int32,
            "BOOLEAN" => ValueType::Boolean,
            "STRING" => ValueType::String,
            _ => ValueType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Fp64 => "FP64",
            ValueType::Fp32 => "FP32",
            ValueType::Int64 => "INT64",
            ValueType::Int32 => "INT32",
            ValueType::Boolean => "BOOLEAN",
            ValueType::String => "STRING",
            ValueType::Unknown => "UNKNOWN",
        }
    }
}

/// One `name·DATATYPE·VALUETYPE[·literal]` operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    pub name: String,
    pub data_type: DataType,
    pub value_type: ValueType,
    pub literal: bool,
}

impl Operand {
    pub fn new(name: impl Into<String>, data_type: DataType, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            data_type,
            value_type,
            literal: false,
        }
    }

    /// Literal scalar operand such as `2·SCALAR·INT64·true`
    pub fn literal(value: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: value.into(),
            data_type: DataType::Scalar,
            value_type,
            literal: true,
        }
    }

    /// Parse an operand field; `None` for fields that are not operands
    pub fn parse(field: &str) -> Option<Self> {
        if is_param_field(field) {
            return None;
        }
        let parts: Vec<&str> = field.split(DATATYPE_PREFIX).collect();
        if parts.len() < 3 {
            return None;
        }
        Some(Self {
            name: parts[0].to_string(),
            data_type: DataType::parse(parts[1]),
            value_type: ValueType::parse(parts[2]),
            literal: parts.get(3).is_some_and(|flag| *flag == "true"),
        })
    }

    pub fn is_matrix(&self) -> bool {
        self.data_type == DataType::Matrix
    }

    pub fn is_frame(&self) -> bool {
        self.data_type == DataType::Frame
    }

    pub fn is_scalar(&self) -> bool {
        self.data_type == DataType::Scalar
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.name,
            DATATYPE_PREFIX,
            self.data_type.as_str(),
            VALUETYPE_PREFIX,
            self.value_type.as_str()
        )?;
        if self.literal {
            write!(f, "{}true", LITERAL_PREFIX)?;
        }
        Ok(())
    }
}

/// `key=value` fields of parameterized builtins
fn is_param_field(field: &str) -> bool {
    match field.split_once('=') {
        Some((key, _)) => {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// A parsed instruction that keeps its original field text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    exec_type: ExecType,
    opcode: String,
    fields: Vec<String>,
}

impl Instruction {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split(OPERAND_DELIMITER);
        let exec_type = ExecType::parse(parts.next().unwrap_or_default())?;
        let opcode = parts
            .next()
            .filter(|op| !op.is_empty())
            .ok_or_else(|| {
                FederatedError::Instruction(format!("Instruction '{}' has no opcode", text))
            })?
            .to_string();
        Ok(Self {
            exec_type,
            opcode,
            fields: parts.map(str::to_string).collect(),
        })
    }

    /// Build an instruction from operands (output last)
    pub fn from_operands(exec_type: ExecType, opcode: &str, operands: &[&Operand]) -> Self {
        Self {
            exec_type,
            opcode: opcode.to_string(),
            fields: operands.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn exec_type(&self) -> ExecType {
        self.exec_type
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// Raw fields after the opcode
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Family this instruction belongs to
    pub fn kind(&self) -> InstructionKind {
        InstructionKind::classify(self.exec_type, &self.opcode)
    }

    /// All operand fields in order
    pub fn operands(&self) -> Vec<Operand> {
        self.fields.iter().filter_map(|f| Operand::parse(f)).collect()
    }

    /// The `index`-th operand field (0-based)
    pub fn operand(&self, index: usize) -> Option<Operand> {
        self.fields
            .iter()
            .filter_map(|f| Operand::parse(f))
            .nth(index)
    }

    /// The last operand field, which carries the output
    pub fn output(&self) -> Option<Operand> {
        self.fields.iter().rev().find_map(|f| Operand::parse(f))
    }

    /// Value of a `key=value` parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.fields.iter().find_map(|f| {
            if !is_param_field(f) {
                return None;
            }
            f.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    pub fn with_exec_type(mut self, exec_type: ExecType) -> Self {
        self.exec_type = exec_type;
        self
    }

    pub fn with_opcode(mut self, opcode: impl Into<String>) -> Self {
        self.opcode = opcode.into();
        self
    }

    pub(crate) fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.exec_type.as_str(), OPERAND_DELIMITER, self.opcode)?;
        for field in &self.fields {
            write!(f, "{}{}", OPERAND_DELIMITER, field)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Instruction {
    type Err = FederatedError;

    fn from_str(s: &str) -> Result<Self> {
        Instruction::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGG: &str = "CP°uark+°_mVar7·MATRIX·FP64°_mVar8·MATRIX·FP64°8";

    #[test]
    fn test_parse_and_format_round_trip() {
        for text in [
            AGG,
            "SPARK°write°_mVar1·MATRIX·FP64°out.csv·SCALAR·STRING·true°federated·SCALAR·STRING·true",
            "CP°replace°target=_mVar3°pattern=NaN°replacement=0°_mVar4·MATRIX·FP64",
            "CP°createvar°pREADX°data/X°false°MATRIX°text°10°5°-1°-1°copy",
        ] {
            let inst = Instruction::parse(text).unwrap();
            assert_eq!(inst.to_string(), text);
        }
    }

    #[test]
    fn test_operands_and_output() {
        let inst = Instruction::parse(AGG).unwrap();
        assert_eq!(inst.exec_type(), ExecType::Cp);
        assert_eq!(inst.opcode(), "uark+");

        let input = inst.operand(0).unwrap();
        assert_eq!(input.name, "_mVar7");
        assert!(input.is_matrix());
        assert_eq!(inst.output().unwrap().name, "_mVar8");
        assert_eq!(inst.operands().len(), 2);
    }

    #[test]
    fn test_literal_operand() {
        let op = Operand::parse("2·SCALAR·INT64·true").unwrap();
        assert!(op.literal);
        assert!(op.is_scalar());
        assert_eq!(op.to_string(), "2·SCALAR·INT64·true");
        assert_eq!(Operand::literal("2", ValueType::Int64), op);
    }

    #[test]
    fn test_params() {
        let inst =
            Instruction::parse("CP°rmempty°target=_mVar3°margin=rows°_mVar4·MATRIX·FP64").unwrap();
        assert_eq!(inst.param("target"), Some("_mVar3"));
        assert_eq!(inst.param("margin"), Some("rows"));
        assert_eq!(inst.param("select"), None);
        assert_eq!(inst.output().unwrap().name, "_mVar4");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Instruction::parse("XX°uak+").is_err());
        assert!(Instruction::parse("CP").is_err());
        assert!(Instruction::parse("CP°").is_err());
    }

    #[test]
    fn test_from_operands() {
        let x = Operand::new("X", DataType::Matrix, ValueType::Fp64);
        let out = Operand::new("m", DataType::Scalar, ValueType::Fp64);
        let inst = Instruction::from_operands(ExecType::Cp, "uamean", &[&x, &out]);
        assert_eq!(inst.to_string(), "CP°uamean°X·MATRIX·FP64°m·SCALAR·FP64");
    }
}
