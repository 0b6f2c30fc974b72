use super::{AggregateFunction, AggregateUnaryOperator, Direction};
use crate::errors::{FederatedError, Result};
use crate::federation::{FType, FederatedRange, FederationMap};
use crate::matrix::aggregate::KahanSum;
use crate::matrix::MatrixBlock;
use crate::protocol::{join_all_responses, FederatedValue, PendingResponse};
use tracing::debug;

/// Wait for every response and return their first values in order
pub async fn get_results(responses: Vec<PendingResponse>) -> Result<Vec<FederatedValue>> {
    collect_values(responses)
        .await
        .map_err(FederatedError::aggregation)
}

/// Wait for every response and fail if any worker failed
pub async fn wait_for(responses: Vec<PendingResponse>) -> Result<()> {
    join_all_responses(responses)
        .await
        .map(|_| ())
        .map_err(FederatedError::aggregation)
}

/// N-ary elementwise sum of the partials
pub async fn agg_add(responses: Vec<PendingResponse>) -> Result<MatrixBlock> {
    async {
        let partials = collect_matrices(responses).await?;
        debug!(partials = partials.len(), "Summing partials");
        MatrixBlock::nary_add(&partials)
    }
    .await
    .map_err(FederatedError::aggregation)
}

/// Count-weighted mean of per-range means
pub async fn agg_mean(
    responses: Vec<PendingResponse>,
    map: &FederationMap,
    direction: Direction,
) -> Result<MatrixBlock> {
    mean(responses, map, direction)
        .await
        .map_err(FederatedError::aggregation)
}

/// Minimum or maximum across partials.
///
/// Without a row/col partitioning every partial collapses into one running
/// scalar. Row or column partitioned partials are folded position by
/// position and must all have the same shape.
pub async fn agg_min_max(
    responses: Vec<PendingResponse>,
    is_min: bool,
    is_scalar: bool,
    ftype: Option<FType>,
) -> Result<FederatedValue> {
    min_max(responses, is_min, is_scalar, ftype)
        .await
        .map_err(FederatedError::aggregation)
}

/// Merge per-range variances with their means (parallel variance)
pub async fn agg_var(
    responses: Vec<PendingResponse>,
    mean_responses: Vec<PendingResponse>,
    map: &FederationMap,
    is_row_aggregate: bool,
    is_scalar: bool,
) -> Result<FederatedValue> {
    variance(responses, mean_responses, map, is_row_aggregate, is_scalar)
        .await
        .map_err(FederatedError::aggregation)
}

/// Concatenate partials in canonical order
pub async fn bind(
    responses: Vec<PendingResponse>,
    map: &FederationMap,
    cbind: bool,
) -> Result<MatrixBlock> {
    bind_partials(responses, map, cbind)
        .await
        .map_err(FederatedError::aggregation)
}

/// Combine matrix-valued partials of an aggregate-unary operator
pub async fn agg_matrix(
    op: AggregateUnaryOperator,
    responses: Vec<PendingResponse>,
    mean_responses: Option<Vec<PendingResponse>>,
    map: &FederationMap,
) -> Result<MatrixBlock> {
    async {
        if op.is_row_aggregate() && map.is_type(FType::Row) {
            return bind_partials(responses, map, false).await;
        }
        if op.is_col_aggregate() && map.is_type(FType::Col) {
            return bind_partials(responses, map, true).await;
        }

        match op.function {
            AggregateFunction::KahanPlus
            | AggregateFunction::KahanPlusSq
            | AggregateFunction::Plus => {
                MatrixBlock::nary_add(&collect_matrices(responses).await?)
            }
            AggregateFunction::Mean => mean(responses, map, op.direction).await,
            AggregateFunction::Min | AggregateFunction::Max => {
                let is_min = op.function == AggregateFunction::Min;
                let value = min_max(responses, is_min, false, Some(map.ftype())).await?;
                Ok(value.into_matrix())
            }
            AggregateFunction::CentralMoment => {
                let means = require_means(mean_responses)?;
                let value =
                    variance(responses, means, map, op.is_row_aggregate(), false).await?;
                Ok(value.into_matrix())
            }
            AggregateFunction::Product
            | AggregateFunction::MaxIndex
            | AggregateFunction::MinIndex => unsupported(op.function, responses).await,
        }
    }
    .await
    .map_err(FederatedError::aggregation)
}

/// Combine scalar partials of a full aggregate
pub async fn agg_scalar(
    op: AggregateUnaryOperator,
    responses: Vec<PendingResponse>,
    mean_responses: Option<Vec<PendingResponse>>,
    map: &FederationMap,
) -> Result<f64> {
    async {
        match op.function {
            AggregateFunction::KahanPlus
            | AggregateFunction::KahanPlusSq
            | AggregateFunction::Plus => {
                let mut sum = KahanSum::default();
                for value in collect_values(responses).await? {
                    sum.add(value.as_scalar()?);
                }
                Ok(sum.value())
            }
            AggregateFunction::Mean => {
                FederatedValue::Matrix(mean(responses, map, Direction::All).await?).as_scalar()
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                let is_min = op.function == AggregateFunction::Min;
                min_max(responses, is_min, true, None).await?.as_scalar()
            }
            AggregateFunction::CentralMoment => {
                let means = require_means(mean_responses)?;
                variance(responses, means, map, false, true).await?.as_scalar()
            }
            AggregateFunction::Product
            | AggregateFunction::MaxIndex
            | AggregateFunction::MinIndex => unsupported(op.function, responses).await,
        }
    }
    .await
    .map_err(FederatedError::aggregation)
}

/// Chan et al. pairwise update of `(count, mean, variance)`.
///
/// Variances are population moments (divided by the count).
pub fn merge_moments(n1: f64, m1: f64, v1: f64, n2: f64, m2: f64, v2: f64) -> (f64, f64, f64) {
    let n = n1 + n2;
    if n == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let delta = m1 - m2;
    let mean = (n1 * m1 + n2 * m2) / n;
    let var = (n1 * v1 + n2 * v2) / n + n1 * n2 * delta * delta / (n * n);
    (n, mean, var)
}

async fn collect_values(responses: Vec<PendingResponse>) -> Result<Vec<FederatedValue>> {
    join_all_responses(responses)
        .await?
        .into_iter()
        .map(|response| response.into_first())
        .collect()
}

async fn collect_matrices(responses: Vec<PendingResponse>) -> Result<Vec<MatrixBlock>> {
    Ok(collect_values(responses)
        .await?
        .into_iter()
        .map(FederatedValue::into_matrix)
        .collect())
}

async fn unsupported<T>(function: AggregateFunction, responses: Vec<PendingResponse>) -> Result<T> {
    join_all_responses(responses).await?;
    Err(FederatedError::UnsupportedOperator(function.name().to_string()))
}

fn require_means(mean_responses: Option<Vec<PendingResponse>>) -> Result<Vec<PendingResponse>> {
    mean_responses.ok_or_else(|| {
        FederatedError::Execution("Variance aggregation requires mean responses".to_string())
    })
}

fn check_alignment<T>(partials: &[T], map: &FederationMap) -> Result<()> {
    if partials.len() != map.len() {
        return Err(FederatedError::Routing(format!(
            "Got {} partials for {} ranges of map {}",
            partials.len(),
            map.len(),
            map.id()
        )));
    }
    Ok(())
}

/// Cell count each partial summarizes
fn weight(range: &FederatedRange, direction: Direction) -> f64 {
    let cells = match direction {
        Direction::All => range.size(),
        Direction::Col => range.size_of(0),
        Direction::Row => range.size_of(1),
    };
    cells as f64
}

async fn mean(
    responses: Vec<PendingResponse>,
    map: &FederationMap,
    direction: Direction,
) -> Result<MatrixBlock> {
    let partials = collect_matrices(responses).await?;
    check_alignment(&partials, map)?;

    let weights: Vec<f64> = map.ranges().map(|r| weight(r, direction)).collect();
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return Err(FederatedError::Execution(
            "Mean over an empty federated matrix".to_string(),
        ));
    }

    let weighted: Vec<MatrixBlock> = partials
        .iter()
        .zip(&weights)
        .map(|(partial, w)| partial.scale(*w))
        .collect();
    debug!(map_id = map.id(), total, "Merging weighted means");
    Ok(MatrixBlock::nary_add(&weighted)?.scale(1.0 / total))
}

async fn min_max(
    responses: Vec<PendingResponse>,
    is_min: bool,
    is_scalar: bool,
    ftype: Option<FType>,
) -> Result<FederatedValue> {
    let values = collect_values(responses).await?;
    let pick = |a: f64, b: f64| if is_min { a.min(b) } else { a.max(b) };

    match ftype {
        Some(FType::Row) | Some(FType::Col) => {
            let mut partials = values.into_iter().map(FederatedValue::into_matrix);
            let first = partials.next().ok_or_else(|| {
                FederatedError::Routing("Min/max over zero partials".to_string())
            })?;
            let folded = partials.try_fold(first, |acc, partial| {
                if acc.shape() != partial.shape() {
                    return Err(FederatedError::Routing(format!(
                        "Partial shapes differ: {}x{} vs {}x{}",
                        acc.rows(),
                        acc.cols(),
                        partial.rows(),
                        partial.cols()
                    )));
                }
                acc.zip_with(&partial, pick)
            })?;
            if is_scalar {
                Ok(FederatedValue::Scalar(FederatedValue::Matrix(folded).as_scalar()?))
            } else {
                Ok(FederatedValue::Matrix(folded))
            }
        }
        Some(FType::Other) | None => {
            let seed = if is_min { f64::MAX } else { f64::MIN };
            let mut result = seed;
            for value in &values {
                let extreme = match value {
                    FederatedValue::Scalar(v) => *v,
                    FederatedValue::Matrix(m) if is_min => m.min(),
                    FederatedValue::Matrix(m) => m.max(),
                };
                result = pick(result, extreme);
            }
            if is_scalar {
                Ok(FederatedValue::Scalar(result))
            } else {
                Ok(FederatedValue::Matrix(MatrixBlock::scalar(result)))
            }
        }
    }
}

async fn variance(
    responses: Vec<PendingResponse>,
    mean_responses: Vec<PendingResponse>,
    map: &FederationMap,
    is_row_aggregate: bool,
    is_scalar: bool,
) -> Result<FederatedValue> {
    let (vars, means) = futures::join!(
        collect_matrices(responses),
        collect_matrices(mean_responses)
    );
    let (vars, means) = (vars?, means?);
    check_alignment(&vars, map)?;
    check_alignment(&means, map)?;

    let direction = if is_scalar {
        Direction::All
    } else if is_row_aggregate {
        Direction::Row
    } else {
        Direction::Col
    };

    let mut acc: Option<(f64, MatrixBlock, MatrixBlock)> = None;
    for ((range, var), mean) in map.ranges().zip(vars).zip(means) {
        let n2 = weight(range, direction);
        if mean.shape() != var.shape() {
            return Err(FederatedError::Routing(format!(
                "Mean partial is {}x{} but variance partial is {}x{}",
                mean.rows(),
                mean.cols(),
                var.rows(),
                var.cols()
            )));
        }
        acc = Some(match acc {
            None => (n2, mean, var),
            Some((n1, m1, v1)) => {
                if v1.shape() != var.shape() {
                    return Err(FederatedError::Routing(
                        "Variance partials have inconsistent shapes".to_string(),
                    ));
                }
                let mut merged_mean = MatrixBlock::zeros(m1.rows(), m1.cols());
                let mut merged_var = MatrixBlock::zeros(v1.rows(), v1.cols());
                for i in 0..v1.rows() {
                    for j in 0..v1.cols() {
                        let (_, m, v) = merge_moments(
                            n1,
                            m1.get(i, j),
                            v1.get(i, j),
                            n2,
                            mean.get(i, j),
                            var.get(i, j),
                        );
                        merged_mean.set(i, j, m);
                        merged_var.set(i, j, v);
                    }
                }
                (n1 + n2, merged_mean, merged_var)
            }
        });
    }

    let (n, _, var) = acc.ok_or_else(|| {
        FederatedError::Routing("Variance over zero partials".to_string())
    })?;
    debug!(map_id = map.id(), count = n, "Merged partial variances");
    if is_scalar {
        Ok(FederatedValue::Scalar(FederatedValue::Matrix(var).as_scalar()?))
    } else {
        Ok(FederatedValue::Matrix(var))
    }
}

async fn bind_partials(
    responses: Vec<PendingResponse>,
    map: &FederationMap,
    cbind: bool,
) -> Result<MatrixBlock> {
    let partials = collect_matrices(responses).await?;
    map.check_contiguous(cbind)?;
    check_alignment(&partials, map)?;
    let (first, rest) = partials
        .split_first()
        .ok_or_else(|| FederatedError::Routing("Bind over zero partials".to_string()))?;
    first.append(rest, cbind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::{FederatedData, FederatedLocalData};
    use crate::protocol::FederatedResponse;
    use std::sync::Arc;

    fn map_of(ranges: &[(i64, i64, i64, i64)], ftype: FType) -> FederationMap {
        let entries: Vec<(FederatedRange, Arc<dyn FederatedData>)> = ranges
            .iter()
            .map(|&(r0, c0, r1, c1)| {
                let data: Arc<dyn FederatedData> =
                    Arc::new(FederatedLocalData::new(1, MatrixBlock::zeros(1, 1)));
                (FederatedRange::matrix(r0, c0, r1, c1).unwrap(), data)
            })
            .collect();
        FederationMap::new(1, entries, ftype).unwrap()
    }

    fn ready(values: Vec<FederatedValue>) -> Vec<PendingResponse> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| PendingResponse::ready(Ok(FederatedResponse::success(i as i64, vec![v]))))
            .collect()
    }

    fn scalars(values: &[f64]) -> Vec<PendingResponse> {
        ready(values.iter().map(|&v| FederatedValue::Scalar(v)).collect())
    }

    fn rows(values: &[&[f64]]) -> Vec<PendingResponse> {
        ready(
            values
                .iter()
                .map(|row| FederatedValue::Matrix(MatrixBlock::from_rows(vec![row.to_vec()]).unwrap()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_agg_mean_weights_by_count() {
        let map = map_of(&[(0, 0, 3, 1), (3, 0, 10, 1)], FType::Row);
        let mean = agg_mean(scalars(&[10.0, 20.0]), &map, Direction::All)
            .await
            .unwrap();
        assert!((mean.get(0, 0) - 17.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_agg_mean_column_aggregate_weights_by_rows() {
        // column means of a 2-row and a 6-row partition
        let map = map_of(&[(0, 0, 2, 2), (2, 0, 8, 2)], FType::Row);
        let mean = agg_mean(rows(&[&[1.0, 4.0], &[5.0, 0.0]]), &map, Direction::Col)
            .await
            .unwrap();
        assert_eq!(mean, MatrixBlock::from_rows(vec![vec![4.0, 1.0]]).unwrap());
    }

    #[tokio::test]
    async fn test_agg_min_max_positional() {
        let max = agg_min_max(rows(&[&[1.0, 5.0, 3.0], &[4.0, 2.0, 6.0]]), false, false, Some(FType::Col))
            .await
            .unwrap();
        assert_eq!(max.into_matrix(), MatrixBlock::from_rows(vec![vec![4.0, 5.0, 6.0]]).unwrap());

        let min = agg_min_max(rows(&[&[1.0, 5.0, 3.0], &[4.0, 2.0, 6.0]]), true, false, Some(FType::Row))
            .await
            .unwrap();
        assert_eq!(min.into_matrix(), MatrixBlock::from_rows(vec![vec![1.0, 2.0, 3.0]]).unwrap());
    }

    #[tokio::test]
    async fn test_agg_min_max_shape_mismatch_is_routing_error() {
        let err = agg_min_max(rows(&[&[1.0, 5.0], &[4.0, 2.0, 6.0]]), true, false, Some(FType::Row))
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), FederatedError::Routing(_)));
    }

    #[tokio::test]
    async fn test_agg_min_max_other_collapses_to_scalar() {
        let min = agg_min_max(rows(&[&[3.0, 9.0], &[-2.0, 4.0]]), true, true, None)
            .await
            .unwrap();
        assert_eq!(min, FederatedValue::Scalar(-2.0));

        let max = agg_min_max(Vec::new(), false, true, Some(FType::Other)).await.unwrap();
        assert_eq!(max, FederatedValue::Scalar(f64::MIN));
    }

    #[test]
    fn test_merge_moments() {
        // {1, 2, 3} and {4, 5}
        let (n, m, v) = merge_moments(3.0, 2.0, 2.0 / 3.0, 2.0, 4.5, 0.25);
        assert_eq!(n, 5.0);
        assert!((m - 3.0).abs() < 1e-12);
        assert!((v - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_agg_var_scalar() {
        let map = map_of(&[(0, 0, 3, 1), (3, 0, 5, 1)], FType::Row);
        let var = agg_var(
            scalars(&[2.0 / 3.0, 0.25]),
            scalars(&[2.0, 4.5]),
            &map,
            false,
            true,
        )
        .await
        .unwrap();
        assert!((var.as_scalar().unwrap() - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_bind_rejects_non_contiguous() {
        let map = map_of(&[(0, 0, 2, 1), (0, 1, 2, 3)], FType::Col);
        let err = bind(rows(&[&[1.0], &[2.0]]), &map, false).await.unwrap_err();
        assert!(matches!(err.root_cause(), FederatedError::NonContiguousBind(_)));
    }

    #[tokio::test]
    async fn test_agg_matrix_unsupported_operator() {
        let map = map_of(&[(0, 0, 2, 2), (2, 0, 4, 2)], FType::Row);
        let op = AggregateUnaryOperator::from_opcode("uac*").unwrap();
        let err = agg_matrix(op, rows(&[&[1.0, 2.0], &[3.0, 4.0]]), None, &map)
            .await
            .unwrap_err();
        assert_eq!(
            err.root_cause().to_string(),
            "Unsupported aggregation operator: Product"
        );
    }

    #[tokio::test]
    async fn test_fail_fast_wraps_once() {
        let map = map_of(&[(0, 0, 1, 1), (1, 0, 2, 1)], FType::Row);
        let responses = vec![
            PendingResponse::ready(Ok(FederatedResponse::success(1, vec![FederatedValue::Scalar(1.0)]))),
            PendingResponse::ready(Ok(FederatedResponse::failure(2, "disk on fire"))),
        ];
        let op = AggregateUnaryOperator::from_opcode("uak+").unwrap();
        let err = agg_scalar(op, responses, None, &map).await.unwrap_err();
        match &err {
            FederatedError::Aggregation(inner) => {
                assert!(matches!(**inner, FederatedError::Worker(_)));
            }
            other => panic!("expected one aggregation wrap, got {other:?}"),
        }
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_get_results_and_wait_for() {
        let values = get_results(scalars(&[1.0, 2.0])).await.unwrap();
        assert_eq!(values, vec![FederatedValue::Scalar(1.0), FederatedValue::Scalar(2.0)]);
        assert!(wait_for(scalars(&[3.0])).await.is_ok());
        let failing = vec![PendingResponse::ready(Ok(FederatedResponse::failure(1, "nope")))];
        assert!(wait_for(failing).await.is_err());
    }
}
