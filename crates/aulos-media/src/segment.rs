#![forbid(unsafe_code)]

//! Segment references and the lazy segment index.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MediaResult;

/// Everything needed to fetch one media segment.
///
/// Times are relative to the owning period. `position` is the segment's
/// stable index within its stream; positions increase with time and may
/// start anywhere (live streams shed old positions without renumbering).
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentReference {
    pub position: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub uris: Vec<String>,
    pub byte_range: Option<(u64, Option<u64>)>,
}

impl SegmentReference {
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Reference to a stream's initialization segment. No times: init segments
/// carry codec setup, not samples.
#[derive(Clone, Debug, PartialEq)]
pub struct InitSegmentReference {
    pub uris: Vec<String>,
    pub byte_range: Option<(u64, Option<u64>)>,
}

/// Lazy per-stream segment index.
///
/// `create` may fetch and parse an on-demand index (e.g. sidx); it must be
/// called before `find`/`get` return anything. Implementations are shared
/// across the engine, so lookups take `&self`.
#[async_trait]
pub trait SegmentIndex: Send + Sync {
    async fn create(&self) -> MediaResult<()>;

    /// Position of the segment containing `time`, if any.
    fn find(&self, time: f64) -> Option<u64>;

    /// The reference at `position`, if still (or already) known.
    fn get(&self, position: u64) -> Option<SegmentReference>;
}

pub type SharedSegmentIndex = Arc<dyn SegmentIndex>;

/// Index over a pre-built, time-sorted reference list.
///
/// Covers any manifest whose segments are enumerated up front; lookups are
/// binary searches. The expected cardinality is thousands, so a sorted
/// vector is the whole data structure.
#[derive(Debug, Default)]
pub struct ListSegmentIndex {
    references: Vec<SegmentReference>,
}

impl ListSegmentIndex {
    /// `references` must be sorted by `start_time` with contiguous,
    /// increasing positions.
    #[must_use]
    pub fn new(references: Vec<SegmentReference>) -> Self {
        debug_assert!(references.windows(2).all(|w| {
            w[0].start_time <= w[1].start_time && w[0].position + 1 == w[1].position
        }));
        Self { references }
    }
}

#[async_trait]
impl SegmentIndex for ListSegmentIndex {
    async fn create(&self) -> MediaResult<()> {
        Ok(())
    }

    fn find(&self, time: f64) -> Option<u64> {
        // Last reference starting at or before `time`.
        let idx = self
            .references
            .partition_point(|r| r.start_time <= time)
            .checked_sub(1)?;
        let reference = &self.references[idx];
        (time < reference.end_time).then_some(reference.position)
    }

    fn get(&self, position: u64) -> Option<SegmentReference> {
        let first = self.references.first()?.position;
        let idx = usize::try_from(position.checked_sub(first)?).ok()?;
        self.references.get(idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(position: u64, start: f64, end: f64) -> SegmentReference {
        SegmentReference {
            position,
            start_time: start,
            end_time: end,
            uris: vec![format!("seg_{position}.mp4")],
            byte_range: None,
        }
    }

    fn index() -> ListSegmentIndex {
        ListSegmentIndex::new(vec![
            reference(0, 0.0, 10.0),
            reference(1, 10.0, 20.0),
            reference(2, 20.0, 30.0),
        ])
    }

    #[test]
    fn find_hits_containing_segment() {
        let index = index();
        assert_eq!(index.find(0.0), Some(0));
        assert_eq!(index.find(9.999), Some(0));
        assert_eq!(index.find(10.0), Some(1));
        assert_eq!(index.find(25.0), Some(2));
    }

    #[test]
    fn find_misses_outside_extent() {
        let index = index();
        assert_eq!(index.find(-0.1), None);
        assert_eq!(index.find(30.0), None);
    }

    #[test]
    fn get_by_position() {
        let index = index();
        assert_eq!(index.get(1).unwrap().start_time, 10.0);
        assert_eq!(index.get(3), None);
    }

    #[test]
    fn get_with_nonzero_first_position() {
        let index = ListSegmentIndex::new(vec![reference(10, 100.0, 102.0), reference(11, 102.0, 104.0)]);
        assert_eq!(index.get(9), None);
        assert_eq!(index.get(11).unwrap().start_time, 102.0);
        assert_eq!(index.find(101.0), Some(10));
    }

    #[test]
    fn empty_index_finds_nothing() {
        let index = ListSegmentIndex::default();
        assert_eq!(index.find(0.0), None);
        assert_eq!(index.get(0), None);
    }
}
