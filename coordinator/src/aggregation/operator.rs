//! Aggregate-unary operators
//!
//! Every aggregate-unary opcode decomposes into a reduction function and a
//! direction. Both are closed enums so combinator dispatch is an exhaustive
//! match.

use serde::{Deserialize, Serialize};

/// Reduction function applied by an aggregate-unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Compensated sum (`uak+`)
    KahanPlus,
    /// Compensated sum of squares (`uasqk+`)
    KahanPlusSq,
    /// Plain sum (`ua+`)
    Plus,
    Mean,
    Min,
    Max,
    /// Central moment of order 2 (`uavar`, `cm`)
    CentralMoment,
    /// Product (`ua*`)
    Product,
    /// Index of the row maximum (`uarimax`)
    MaxIndex,
    /// Index of the row minimum (`uarimin`)
    MinIndex,
}

impl AggregateFunction {
    /// Name reported in error messages
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::KahanPlus => "KahanPlus",
            AggregateFunction::KahanPlusSq => "KahanPlusSq",
            AggregateFunction::Plus => "Plus",
            AggregateFunction::Mean => "Mean",
            AggregateFunction::Min => "Min",
            AggregateFunction::Max => "Max",
            AggregateFunction::CentralMoment => "CentralMoment",
            AggregateFunction::Product => "Product",
            AggregateFunction::MaxIndex => "MaxIndex",
            AggregateFunction::MinIndex => "MinIndex",
        }
    }
}

/// Axis an aggregate reduces over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Full aggregate producing a scalar
    All,
    /// Row aggregate producing one value per row (rows x 1)
    Row,
    /// Column aggregate producing one value per column (1 x cols)
    Col,
}

/// An aggregate-unary operator: a function applied along a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateUnaryOperator {
    pub function: AggregateFunction,
    pub direction: Direction,
}

const OPCODES: &[(&str, AggregateFunction, Direction)] = &[
    ("uak+", AggregateFunction::KahanPlus, Direction::All),
    ("uark+", AggregateFunction::KahanPlus, Direction::Row),
    ("uack+", AggregateFunction::KahanPlus, Direction::Col),
    ("uasqk+", AggregateFunction::KahanPlusSq, Direction::All),
    ("uarsqk+", AggregateFunction::KahanPlusSq, Direction::Row),
    ("uacsqk+", AggregateFunction::KahanPlusSq, Direction::Col),
    ("ua+", AggregateFunction::Plus, Direction::All),
    ("uar+", AggregateFunction::Plus, Direction::Row),
    ("uac+", AggregateFunction::Plus, Direction::Col),
    ("uamean", AggregateFunction::Mean, Direction::All),
    ("uarmean", AggregateFunction::Mean, Direction::Row),
    ("uacmean", AggregateFunction::Mean, Direction::Col),
    ("uamin", AggregateFunction::Min, Direction::All),
    ("uarmin", AggregateFunction::Min, Direction::Row),
    ("uacmin", AggregateFunction::Min, Direction::Col),
    ("uamax", AggregateFunction::Max, Direction::All),
    ("uarmax", AggregateFunction::Max, Direction::Row),
    ("uacmax", AggregateFunction::Max, Direction::Col),
    ("uavar", AggregateFunction::CentralMoment, Direction::All),
    ("uarvar", AggregateFunction::CentralMoment, Direction::Row),
    ("uacvar", AggregateFunction::CentralMoment, Direction::Col),
    ("ua*", AggregateFunction::Product, Direction::All),
    ("uar*", AggregateFunction::Product, Direction::Row),
    ("uac*", AggregateFunction::Product, Direction::Col),
    ("uarimax", AggregateFunction::MaxIndex, Direction::Row),
    ("uarimin", AggregateFunction::MinIndex, Direction::Row),
];

impl AggregateUnaryOperator {
    pub fn new(function: AggregateFunction, direction: Direction) -> Self {
        Self {
            function,
            direction,
        }
    }

    /// Look up the operator behind an aggregate-unary opcode
    pub fn from_opcode(opcode: &str) -> Option<Self> {
        OPCODES
            .iter()
            .find(|(name, _, _)| *name == opcode)
            .map(|&(_, function, direction)| Self::new(function, direction))
    }

    /// Opcode encoding this operator, if one exists
    pub fn opcode(&self) -> Option<&'static str> {
        OPCODES
            .iter()
            .find(|(_, f, d)| *f == self.function && *d == self.direction)
            .map(|(name, _, _)| *name)
    }

    /// Whether `opcode` names an aggregate-unary operator
    pub fn is_opcode(opcode: &str) -> bool {
        Self::from_opcode(opcode).is_some()
    }

    pub fn is_row_aggregate(&self) -> bool {
        self.direction == Direction::Row
    }

    pub fn is_col_aggregate(&self) -> bool {
        self.direction == Direction::Col
    }

    pub fn is_full_aggregate(&self) -> bool {
        self.direction == Direction::All
    }

    /// The mean operator along the same direction, used to collect the
    /// helper partials a variance merge needs
    pub fn mean_counterpart(&self) -> Self {
        Self::new(AggregateFunction::Mean, self.direction)
    }
}
