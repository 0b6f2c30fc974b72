use crate::errors::{FederatedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned half-open box `[begin, end)` of logical coordinates.
///
/// One entry per axis (row, column). Ordering is lexicographic by
/// `(begin, end)`, which is the canonical iteration order of a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct FederatedRange {
    begin: Vec<i64>,
    end: Vec<i64>,
}

#[derive(Deserialize)]
struct RawRange {
    begin: Vec<i64>,
    end: Vec<i64>,
}

impl TryFrom<RawRange> for FederatedRange {
    type Error = FederatedError;

    fn try_from(raw: RawRange) -> Result<Self> {
        FederatedRange::new(raw.begin, raw.end)
    }
}

impl FederatedRange {
    pub fn new(begin: Vec<i64>, end: Vec<i64>) -> Result<Self> {
        if begin.len() != end.len() || begin.is_empty() {
            return Err(FederatedError::Routing(format!(
                "Range dimensions disagree: begin {:?}, end {:?}",
                begin, end
            )));
        }
        if begin.iter().any(|&b| b < 0) || begin.iter().zip(&end).any(|(b, e)| e < b) {
            return Err(FederatedError::Routing(format!(
                "Negative range: begin {:?}, end {:?}",
                begin, end
            )));
        }
        Ok(Self { begin, end })
    }

    /// Two-dimensional range `[r0, c0]..[r1, c1]`
    pub fn matrix(r0: i64, c0: i64, r1: i64, c1: i64) -> Result<Self> {
        Self::new(vec![r0, c0], vec![r1, c1])
    }

    /// Range `[0, 0]..[rows, cols]` covering a whole matrix
    pub fn covering(rows: usize, cols: usize) -> Self {
        Self {
            begin: vec![0, 0],
            end: vec![rows as i64, cols as i64],
        }
    }

    pub fn begin(&self) -> &[i64] {
        &self.begin
    }

    pub fn end(&self) -> &[i64] {
        &self.end
    }

    pub fn dims(&self) -> usize {
        self.begin.len()
    }

    /// Extent along one axis
    pub fn size_of(&self, axis: usize) -> i64 {
        self.end[axis] - self.begin[axis]
    }

    /// Total number of cells covered
    pub fn size(&self) -> i64 {
        (0..self.dims()).map(|axis| self.size_of(axis)).product()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the two boxes share at least one cell
    pub fn overlaps(&self, other: &FederatedRange) -> bool {
        self.dims() == other.dims()
            && (0..self.dims()).all(|axis| {
                self.begin[axis] < other.end[axis] && other.begin[axis] < self.end[axis]
            })
    }
}

impl fmt::Display for FederatedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..{:?}", self.begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let r = FederatedRange::matrix(2, 0, 5, 4).unwrap();
        assert_eq!(r.size_of(0), 3);
        assert_eq!(r.size_of(1), 4);
        assert_eq!(r.size(), 12);
        assert_eq!(r.to_string(), "[2, 0]..[5, 4]");
    }

    #[test]
    fn test_rejects_negative() {
        assert!(FederatedRange::matrix(3, 0, 2, 4).is_err());
        assert!(FederatedRange::matrix(-1, 0, 2, 4).is_err());
        assert!(FederatedRange::new(vec![0], vec![1, 2]).is_err());
    }

    #[test]
    fn test_overlaps() {
        let a = FederatedRange::matrix(0, 0, 3, 4).unwrap();
        let b = FederatedRange::matrix(3, 0, 6, 4).unwrap();
        let c = FederatedRange::matrix(2, 2, 4, 3).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_canonical_order() {
        let mut ranges = vec![
            FederatedRange::matrix(6, 0, 9, 4).unwrap(),
            FederatedRange::matrix(0, 0, 3, 4).unwrap(),
            FederatedRange::matrix(3, 0, 6, 4).unwrap(),
        ];
        ranges.sort();
        let starts: Vec<i64> = ranges.iter().map(|r| r.begin()[0]).collect();
        assert_eq!(starts, vec![0, 3, 6]);
    }

    #[test]
    fn test_decode_validates() {
        #[derive(Serialize)]
        struct WireRange {
            begin: Vec<i64>,
            end: Vec<i64>,
        }

        let backwards = WireRange {
            begin: vec![4, 0],
            end: vec![2, 3],
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&backwards, &mut bytes).unwrap();
        let decoded: std::result::Result<FederatedRange, _> = ciborium::from_reader(bytes.as_slice());
        assert!(decoded.is_err());

        let good = FederatedRange::matrix(0, 0, 2, 3).unwrap();
        let mut bytes = Vec::new();
        ciborium::into_writer(&good, &mut bytes).unwrap();
        let decoded: FederatedRange = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, good);
    }
}
