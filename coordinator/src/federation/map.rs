use super::data::{FederatedData, FederatedLocalData, FederatedWorkerData};
use super::{FederatedRange, IdSequence};
use crate::errors::{FederatedError, Result};
use crate::matrix::MatrixBlock;
use crate::protocol::{join_all_responses, FederatedRequest, FederatedValue, PendingResponse};
use crate::worker::WorkerHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Structural partitioning of a federated object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FType {
    /// Every range spans all columns
    Row,
    /// Every range spans all rows
    Col,
    Other,
}

impl FType {
    /// Derive the partitioning from ranges covering a `(rows, cols)` shape
    pub fn infer(ranges: &[FederatedRange], shape: (usize, usize)) -> FType {
        if FType::Row.describes(ranges, shape) {
            FType::Row
        } else if FType::Col.describes(ranges, shape) {
            FType::Col
        } else {
            FType::Other
        }
    }

    /// Whether the ranges are laid out the way this partitioning claims.
    /// `Other` makes no claim and fits any layout.
    pub fn describes(self, ranges: &[FederatedRange], shape: (usize, usize)) -> bool {
        let spans = |r: &FederatedRange, axis: usize, extent: usize| {
            r.begin()[axis] == 0 && r.end()[axis] == extent as i64
        };
        match self {
            FType::Row => ranges.iter().all(|r| spans(r, 1, shape.1)),
            FType::Col => ranges.iter().all(|r| spans(r, 0, shape.0)),
            FType::Other => true,
        }
    }
}

impl fmt::Display for FType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FType::Row => "ROW",
            FType::Col => "COL",
            FType::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Routing table from disjoint ranges to the workers holding them.
///
/// Immutable once built; a topology change means a new map with a new id.
/// Workers store their partition under the map id.
#[derive(Debug, Clone)]
pub struct FederationMap {
    id: i64,
    entries: BTreeMap<FederatedRange, Arc<dyn FederatedData>>,
    ftype: FType,
}

impl FederationMap {
    /// Build a map, rejecting overlapping, gapped or malformed ranges and a
    /// partitioning tag the ranges do not match
    pub fn new(
        id: i64,
        entries: Vec<(FederatedRange, Arc<dyn FederatedData>)>,
        ftype: FType,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(FederatedError::Routing(
                "Federation map needs at least one range".to_string(),
            ));
        }

        let single = entries.len() == 1;
        let mut map = BTreeMap::new();
        for (range, data) in entries {
            if range.dims() != 2 {
                return Err(FederatedError::Routing(format!(
                    "Range {} is not two-dimensional",
                    range
                )));
            }
            if range.is_empty() && !single {
                return Err(FederatedError::Routing(format!("Empty range {}", range)));
            }
            if let Some(existing) = map.keys().find(|r: &&FederatedRange| r.overlaps(&range)) {
                return Err(FederatedError::Routing(format!(
                    "Range {} overlaps {}",
                    range, existing
                )));
            }
            if map.insert(range.clone(), data).is_some() {
                return Err(FederatedError::Routing(format!("Duplicate range {}", range)));
            }
        }

        let fed_map = Self {
            id,
            entries: map,
            ftype,
        };
        fed_map.check_coverage()?;
        fed_map.check_ftype()?;
        Ok(fed_map)
    }

    fn check_ftype(&self) -> Result<()> {
        let ranges: Vec<FederatedRange> = self.ranges().cloned().collect();
        if !self.ftype.describes(&ranges, self.shape()) {
            let (rows, cols) = self.shape();
            return Err(FederatedError::Routing(format!(
                "Ranges of map {} are not {} partitioned over {}x{}",
                self.id, self.ftype, rows, cols
            )));
        }
        Ok(())
    }

    fn check_coverage(&self) -> Result<()> {
        let origin_ok = self.ranges().any(|r| r.begin() == [0, 0]);
        let (rows, cols) = self.shape();
        let covered: i64 = self.ranges().map(FederatedRange::size).sum();
        if !origin_ok || covered != (rows * cols) as i64 {
            return Err(FederatedError::Routing(format!(
                "Ranges cover {} of {} cells in a {}x{} extent",
                covered,
                rows * cols,
                rows,
                cols
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn ftype(&self) -> FType {
        self.ftype
    }

    pub fn is_type(&self, ftype: FType) -> bool {
        self.ftype == ftype
    }

    /// Logical shape `(rows, cols)`, the bounding extent of all ranges
    pub fn shape(&self) -> (usize, usize) {
        let max_end = |axis: usize| self.ranges().map(|r| r.end()[axis]).max().unwrap_or(0);
        (max_end(0) as usize, max_end(1) as usize)
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranges in canonical order
    pub fn ranges(&self) -> impl Iterator<Item = &FederatedRange> + '_ {
        self.entries.keys()
    }

    /// Ranges and their data handles in canonical order
    pub fn entries(&self) -> impl Iterator<Item = (&FederatedRange, &Arc<dyn FederatedData>)> + '_ {
        self.entries.iter()
    }

    /// Send one request to every worker.
    ///
    /// All requests are dispatched before this returns; responses come back
    /// in canonical range order.
    pub fn broadcast(&self, request: &FederatedRequest) -> Vec<PendingResponse> {
        debug!(
            map_id = self.id,
            request_id = request.id,
            request_type = ?request.request_type,
            workers = self.entries.len(),
            "Broadcasting federated request"
        );
        self.entries
            .values()
            .map(|data| data.execute(request.clone()))
            .collect()
    }

    /// Verify the ranges tile the bind axis contiguously in canonical order
    pub fn check_contiguous(&self, cbind: bool) -> Result<()> {
        let (axis, other) = if cbind { (1, 0) } else { (0, 1) };
        let other_extent = self.shape_along(other);
        let mut expected = 0;
        for range in self.ranges() {
            if range.begin()[axis] != expected
                || range.begin()[other] != 0
                || range.end()[other] != other_extent
            {
                return Err(FederatedError::NonContiguousBind(format!(
                    "range {} does not continue a {} at offset {}",
                    range,
                    if cbind { "cbind" } else { "rbind" },
                    expected
                )));
            }
            expected = range.end()[axis];
        }
        Ok(())
    }

    fn shape_along(&self, axis: usize) -> i64 {
        let (rows, cols) = self.shape();
        if axis == 0 {
            rows as i64
        } else {
            cols as i64
        }
    }
}

/// Federate an in-process matrix as a single-range map.
///
/// The block is wrapped in place and stored under the new map id.
pub fn federate_local_data(ids: &IdSequence, block: MatrixBlock) -> FederationMap {
    let id = ids.next_id();
    let (rows, cols) = block.shape();
    let range = FederatedRange::covering(rows, cols);
    let data: Arc<dyn FederatedData> = Arc::new(FederatedLocalData::new(id, block));
    let mut entries = BTreeMap::new();
    entries.insert(range, data);
    info!(map_id = id, rows, cols, "Federated local data");
    FederationMap {
        id,
        entries,
        ftype: FType::Row,
    }
}

/// Register partitions on their workers and build the resulting map.
///
/// Each worker receives a `PutVar` under the new map id. The map is
/// validated before anything is sent.
pub async fn federate(
    ids: &IdSequence,
    tid: u64,
    partitions: Vec<(FederatedRange, WorkerHandle, MatrixBlock)>,
    ftype: FType,
) -> Result<FederationMap> {
    let id = ids.next_id();
    let mut entries: Vec<(FederatedRange, Arc<dyn FederatedData>)> =
        Vec::with_capacity(partitions.len());
    let mut blocks = Vec::with_capacity(partitions.len());
    for (range, worker, block) in partitions {
        let data: Arc<dyn FederatedData> = Arc::new(FederatedWorkerData::new(worker));
        entries.push((range, data));
        blocks.push(block);
    }
    let map = FederationMap::new(id, entries.clone(), ftype)?;

    let pending: Vec<PendingResponse> = entries
        .iter()
        .zip(blocks)
        .map(|((range, data), block)| {
            debug!(map_id = id, worker = %data.worker_id(), range = %range, "Registering partition");
            let request =
                FederatedRequest::put_var(id, FederatedValue::Matrix(block)).with_tid(tid);
            data.execute(request)
        })
        .collect();
    join_all_responses(pending).await?;

    info!(
        map_id = id,
        partitions = map.len(),
        ftype = %ftype,
        "Federated partitions registered"
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: i64) -> Arc<dyn FederatedData> {
        Arc::new(FederatedLocalData::new(id, MatrixBlock::zeros(1, 1)))
    }

    fn range(r0: i64, c0: i64, r1: i64, c1: i64) -> FederatedRange {
        FederatedRange::matrix(r0, c0, r1, c1).unwrap()
    }

    #[test]
    fn test_valid_row_map() {
        let map = FederationMap::new(
            1,
            vec![
                (range(3, 0, 10, 4), local(1)),
                (range(0, 0, 3, 4), local(1)),
            ],
            FType::Row,
        )
        .unwrap();
        assert_eq!(map.shape(), (10, 4));
        assert_eq!(map.len(), 2);
        let starts: Vec<i64> = map.ranges().map(|r| r.begin()[0]).collect();
        assert_eq!(starts, vec![0, 3]);
        assert!(map.check_contiguous(false).is_ok());
        assert!(matches!(
            map.check_contiguous(true),
            Err(FederatedError::NonContiguousBind(_))
        ));
    }

    #[test]
    fn test_rejects_overlap_gap_and_duplicates() {
        let overlap = FederationMap::new(
            1,
            vec![(range(0, 0, 4, 2), local(1)), (range(3, 0, 6, 2), local(1))],
            FType::Row,
        );
        assert!(matches!(overlap, Err(FederatedError::Routing(_))));

        let gap = FederationMap::new(
            1,
            vec![(range(0, 0, 2, 2), local(1)), (range(3, 0, 5, 2), local(1))],
            FType::Row,
        );
        assert!(matches!(gap, Err(FederatedError::Routing(_))));

        let duplicate = FederationMap::new(
            1,
            vec![(range(0, 0, 2, 2), local(1)), (range(0, 0, 2, 2), local(1))],
            FType::Row,
        );
        assert!(duplicate.is_err());

        let empty = FederationMap::new(
            1,
            vec![(range(0, 0, 2, 2), local(1)), (range(2, 0, 2, 2), local(1))],
            FType::Row,
        );
        assert!(empty.is_err());
    }

    #[test]
    fn test_rejects_mismatched_ftype() {
        let row_blocks = || {
            vec![
                (range(0, 0, 2, 2), local(1)),
                (range(2, 0, 4, 2), local(1)),
            ]
        };
        let tagged_col = FederationMap::new(1, row_blocks(), FType::Col);
        assert!(matches!(tagged_col, Err(FederatedError::Routing(_))));
        assert!(FederationMap::new(1, row_blocks(), FType::Row).is_ok());
        assert!(FederationMap::new(1, row_blocks(), FType::Other).is_ok());

        let col_blocks = vec![(range(0, 0, 4, 1), local(1)), (range(0, 1, 4, 2), local(1))];
        assert!(FederationMap::new(1, col_blocks, FType::Row).is_err());

        // a single block spans both axes
        let whole = FederationMap::new(1, vec![(range(0, 0, 4, 2), local(1))], FType::Col);
        assert!(whole.is_ok());
    }

    #[test]
    fn test_infer_ftype() {
        let rows = [range(0, 0, 2, 3), range(2, 0, 4, 3)];
        assert_eq!(FType::infer(&rows, (4, 3)), FType::Row);
        let cols = [range(0, 0, 4, 1), range(0, 1, 4, 3)];
        assert_eq!(FType::infer(&cols, (4, 3)), FType::Col);
        let grid = [
            range(0, 0, 2, 1),
            range(0, 1, 2, 3),
            range(2, 0, 4, 3),
        ];
        assert_eq!(FType::infer(&grid, (4, 3)), FType::Other);
    }

    #[test]
    fn test_federate_local_data() {
        let ids = IdSequence::new();
        let map = federate_local_data(&ids, MatrixBlock::zeros(5, 2));
        assert_eq!(map.id(), 1);
        assert!(map.is_type(FType::Row));
        let ranges: Vec<_> = map.ranges().cloned().collect();
        assert_eq!(ranges, vec![range(0, 0, 5, 2)]);
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order() {
        let ids = IdSequence::new();
        let map = federate_local_data(&ids, MatrixBlock::filled(2, 2, 3.0));
        let request = FederatedRequest::get_var(ids.next_id(), map.id());
        let responses = join_all_responses(map.broadcast(&request)).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0].data,
            vec![FederatedValue::Matrix(MatrixBlock::filled(2, 2, 3.0))]
        );
    }
}
