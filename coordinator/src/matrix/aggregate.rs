//! Local aggregate-unary kernels
//!
//! These are what a worker evaluates against its own partition. Full
//! aggregates produce a scalar, row aggregates a `rows x 1` column vector and
//! column aggregates a `1 x cols` row vector.

use super::MatrixBlock;
use crate::aggregation::{AggregateFunction, AggregateUnaryOperator, Direction};
use crate::errors::{FederatedError, Result};
use crate::protocol::FederatedValue;

/// Compensated (Kahan) summation
#[derive(Debug, Default, Clone, Copy)]
pub struct KahanSum {
    sum: f64,
    correction: f64,
}

impl KahanSum {
    pub fn add(&mut self, value: f64) {
        let corrected = value - self.correction;
        let next = self.sum + corrected;
        self.correction = (next - self.sum) - corrected;
        self.sum = next;
    }

    pub fn value(&self) -> f64 {
        self.sum
    }
}

/// Single-pass population variance (Welford)
pub fn single_pass_variance(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut n = 0.0;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for x in values {
        n += 1.0;
        let delta = x - mean;
        mean += delta / n;
        m2 += delta * (x - mean);
    }
    m2 / n
}

fn reduce(function: AggregateFunction, values: &[f64]) -> f64 {
    match function {
        AggregateFunction::KahanPlus => {
            let mut acc = KahanSum::default();
            values.iter().for_each(|&v| acc.add(v));
            acc.value()
        }
        AggregateFunction::KahanPlusSq => {
            let mut acc = KahanSum::default();
            values.iter().for_each(|&v| acc.add(v * v));
            acc.value()
        }
        AggregateFunction::Plus => values.iter().sum(),
        AggregateFunction::Mean => {
            let mut acc = KahanSum::default();
            values.iter().for_each(|&v| acc.add(v));
            acc.value() / values.len() as f64
        }
        AggregateFunction::Min => values.iter().copied().fold(f64::MAX, f64::min),
        AggregateFunction::Max => values.iter().copied().fold(f64::MIN, f64::max),
        AggregateFunction::CentralMoment => single_pass_variance(values.iter().copied()),
        AggregateFunction::Product => values.iter().product(),
        AggregateFunction::MaxIndex => arg_extreme(values, |a, b| a > b),
        AggregateFunction::MinIndex => arg_extreme(values, |a, b| a < b),
    }
}

/// 1-based position of the first extreme value
fn arg_extreme(values: &[f64], better: impl Fn(f64, f64) -> bool) -> f64 {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if !better(v, b) => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| (i + 1) as f64).unwrap_or(0.0)
}

impl MatrixBlock {
    /// Evaluate an aggregate-unary operator over this block
    pub fn aggregate(&self, op: AggregateUnaryOperator) -> Result<FederatedValue> {
        let index_function = matches!(
            op.function,
            AggregateFunction::MaxIndex | AggregateFunction::MinIndex
        );
        if index_function && op.direction != Direction::Row {
            return Err(FederatedError::Execution(format!(
                "{} is only defined as a row aggregate",
                op.function.name()
            )));
        }

        match op.direction {
            Direction::All => Ok(FederatedValue::Scalar(reduce(op.function, self.values()))),
            Direction::Row => {
                let values = (0..self.rows())
                    .map(|r| reduce(op.function, self.row(r)))
                    .collect();
                Ok(FederatedValue::Matrix(MatrixBlock::new(self.rows(), 1, values)?))
            }
            Direction::Col => {
                let mut column = Vec::with_capacity(self.rows());
                let mut values = Vec::with_capacity(self.cols());
                for c in 0..self.cols() {
                    column.clear();
                    column.extend((0..self.rows()).map(|r| self.get(r, c)));
                    values.push(reduce(op.function, &column));
                }
                Ok(FederatedValue::Matrix(MatrixBlock::new(1, self.cols(), values)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(opcode: &str) -> AggregateUnaryOperator {
        AggregateUnaryOperator::from_opcode(opcode).unwrap()
    }

    fn sample() -> MatrixBlock {
        MatrixBlock::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap()
    }

    #[test]
    fn test_full_aggregates() {
        let x = sample();
        assert_eq!(x.aggregate(op("uak+")).unwrap(), FederatedValue::Scalar(21.0));
        assert_eq!(x.aggregate(op("uasqk+")).unwrap(), FederatedValue::Scalar(91.0));
        assert_eq!(x.aggregate(op("uamean")).unwrap(), FederatedValue::Scalar(3.5));
        assert_eq!(x.aggregate(op("uamin")).unwrap(), FederatedValue::Scalar(1.0));
        assert_eq!(x.aggregate(op("uamax")).unwrap(), FederatedValue::Scalar(6.0));
        assert_eq!(x.aggregate(op("ua*")).unwrap(), FederatedValue::Scalar(720.0));
    }

    #[test]
    fn test_row_and_col_aggregates() {
        let x = sample();
        assert_eq!(
            x.aggregate(op("uark+")).unwrap(),
            FederatedValue::Matrix(MatrixBlock::new(2, 1, vec![6.0, 15.0]).unwrap())
        );
        assert_eq!(
            x.aggregate(op("uacmax")).unwrap(),
            FederatedValue::Matrix(MatrixBlock::new(1, 3, vec![4.0, 5.0, 6.0]).unwrap())
        );
        assert_eq!(
            x.aggregate(op("uarimax")).unwrap(),
            FederatedValue::Matrix(MatrixBlock::new(2, 1, vec![3.0, 3.0]).unwrap())
        );
    }

    #[test]
    fn test_variance_is_population_moment() {
        let x = sample();
        let expected = 17.5 / 6.0;
        match x.aggregate(op("uavar")).unwrap() {
            FederatedValue::Scalar(v) => assert!((v - expected).abs() < 1e-12),
            other => panic!("expected scalar, got {other:?}"),
        }
    }

    #[test]
    fn test_index_aggregate_requires_row_direction() {
        let bad = AggregateUnaryOperator::new(AggregateFunction::MaxIndex, Direction::All);
        assert!(sample().aggregate(bad).is_err());
    }

    #[test]
    fn test_kahan_sum_compensates() {
        let mut acc = KahanSum::default();
        let mut naive = 1.0;
        acc.add(1.0);
        for _ in 0..10 {
            acc.add(1e-16);
            naive += 1e-16;
        }
        assert_eq!(naive, 1.0);
        assert!(acc.value() > 1.0);
    }
}
