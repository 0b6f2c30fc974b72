//! Contiguous splitting of a matrix into federated partitions

use super::{federate, FType, FederatedRange, FederationMap, IdSequence};
use crate::errors::{FederatedError, Result};
use crate::matrix::MatrixBlock;
use crate::worker::{FederatedWorkerHandler, WorkerHandle};
use std::sync::Arc;

/// Split `matrix` into `n` contiguous blocks along the axis `ftype` names.
///
/// Every block gets `extent / n` rows (or columns); the last one also takes
/// the remainder. Blocks come back in canonical range order.
pub fn split(
    matrix: &MatrixBlock,
    n: usize,
    ftype: FType,
) -> Result<Vec<(FederatedRange, MatrixBlock)>> {
    let (rows, cols) = matrix.shape();
    let extent = match ftype {
        FType::Row => rows,
        FType::Col => cols,
        FType::Other => {
            return Err(FederatedError::Routing(
                "Only row or column partitioning is supported".to_string(),
            ))
        }
    };
    if n == 0 || n > extent {
        return Err(FederatedError::Routing(format!(
            "Cannot split an extent of {} into {} partitions",
            extent, n
        )));
    }

    let chunk = extent / n;
    (0..n)
        .map(|i| {
            let start = i * chunk;
            let end = if i == n - 1 { extent } else { start + chunk };
            let (r0, r1, c0, c1) = match ftype {
                FType::Row => (start, end, 0, cols),
                _ => (0, rows, start, end),
            };
            let range = FederatedRange::matrix(r0 as i64, c0 as i64, r1 as i64, c1 as i64)?;
            Ok((range, matrix.slice(r0, r1, c0, c1)?))
        })
        .collect()
}

/// Split `matrix`, spawn one worker per block and federate the blocks.
///
/// Must be called within a tokio runtime.
pub async fn distribute(
    ids: &IdSequence,
    tid: u64,
    matrix: &MatrixBlock,
    n: usize,
    ftype: FType,
    queue_depth: usize,
) -> Result<FederationMap> {
    let partitions = split(matrix, n, ftype)?
        .into_iter()
        .map(|(range, block)| {
            let worker = WorkerHandle::spawn(Arc::new(FederatedWorkerHandler::new()), queue_depth);
            (range, worker, block)
        })
        .collect();
    federate(ids, tid, partitions, ftype).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rows: usize, cols: usize) -> MatrixBlock {
        let values = (0..rows * cols).map(|v| v as f64).collect();
        MatrixBlock::new(rows, cols, values).unwrap()
    }

    #[test]
    fn test_row_split_last_takes_remainder() {
        let parts = split(&sample(10, 3), 3, FType::Row).unwrap();
        let sizes: Vec<i64> = parts.iter().map(|(r, _)| r.size_of(0)).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
        assert_eq!(parts[2].0.begin(), &[6, 0]);
        assert_eq!(parts[2].1.rows(), 4);
        assert_eq!(parts[1].1.get(0, 0), 9.0);
    }

    #[test]
    fn test_col_split() {
        let parts = split(&sample(2, 5), 2, FType::Col).unwrap();
        assert_eq!(parts[0].0.end(), &[2, 2]);
        assert_eq!(parts[1].0.begin(), &[0, 2]);
        assert_eq!(parts[1].1.shape(), (2, 3));
    }

    #[tokio::test]
    async fn test_distribute_registers_partitions() {
        use crate::protocol::{join_all_responses, FederatedRequest};

        let ids = IdSequence::new();
        let x = sample(5, 2);
        let map = distribute(&ids, 1, &x, 2, FType::Row, 4).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.shape(), (5, 2));

        let request = FederatedRequest::get_var(ids.next_id(), map.id());
        let blocks: Vec<MatrixBlock> = join_all_responses(map.broadcast(&request))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.into_first().unwrap().into_matrix())
            .collect();
        assert_eq!(blocks[0].append(&blocks[1..], false).unwrap(), x);
    }

    #[test]
    fn test_split_rejects_bad_counts() {
        assert!(split(&sample(2, 2), 0, FType::Row).is_err());
        assert!(split(&sample(2, 2), 3, FType::Row).is_err());
        assert!(split(&sample(2, 2), 2, FType::Other).is_err());
    }
}
