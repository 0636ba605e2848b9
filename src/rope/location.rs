//! Mapping between live rope indices and the source text they came from.
//!
//! A [`TrackedLocation`] ties an index in a rope to an `(offset, source)`
//! pair. When the index has no exact source position (padding, replaced
//! text) the `prev_*` and `next_*` fields carry the closest exact positions
//! on either side; for exact locations all three agree.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::{Range, SourceRun};

/// Identity of a backing character store.
///
/// Two ropes report the same `SourceId` exactly when they read from the same
/// allocation, so an id is only meaningful while some rope keeps that
/// allocation alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl SourceId {
    pub fn of<T: ?Sized>(source: &Rc<T>) -> SourceId {
        return SourceId(Rc::as_ptr(source).cast::<()>() as usize);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedLocation {
    pub index: usize,
    pub prev_index: usize,
    pub next_index: usize,
    pub offset: usize,
    pub prev_offset: usize,
    pub next_offset: usize,
    pub source: SourceId,
    pub prev_source: SourceId,
    pub next_source: SourceId,
}

impl TrackedLocation {
    pub fn new(index: usize, offset: usize, source: SourceId) -> TrackedLocation {
        return TrackedLocation {
            index,
            prev_index: index,
            next_index: index,
            offset,
            prev_offset: offset,
            next_offset: offset,
            source,
            prev_source: source,
            next_source: source,
        };
    }

    pub fn is_exact(&self) -> bool {
        return self.index == self.prev_index
            && self.index == self.next_index
            && self.source == self.prev_source
            && self.source == self.next_source;
    }

    /// Move the location to `index`, shifting the closest neighbors by the
    /// same amount.
    pub fn at_index(self, index: usize) -> TrackedLocation {
        let shift = |i: usize| (i + index).saturating_sub(self.index);
        return TrackedLocation {
            index,
            prev_index: shift(self.prev_index),
            next_index: shift(self.next_index),
            ..self
        };
    }

    /// Add `delta` to the index and its neighbors.
    #[inline]
    pub fn shifted(self, delta: usize) -> TrackedLocation {
        return self.at_index(self.index + delta);
    }

    pub fn with_prev_closest(self, prev_index: usize, prev_offset: usize, prev_source: SourceId) -> TrackedLocation {
        return TrackedLocation {
            prev_index,
            prev_offset,
            prev_source,
            ..self
        };
    }

    pub fn with_next_closest(self, next_index: usize, next_offset: usize, next_source: SourceId) -> TrackedLocation {
        return TrackedLocation {
            next_index,
            next_offset,
            next_source,
            ..self
        };
    }

    /// Pull every index into `[0, limit]`.
    pub fn clamped(self, limit: usize) -> TrackedLocation {
        return TrackedLocation {
            index: self.index.min(limit),
            prev_index: self.prev_index.min(limit),
            next_index: self.next_index.min(limit),
            ..self
        };
    }
}

/// Source runs of a rope frozen at one point in time, indexed by source
/// offset.
///
/// Looking up an offset in a snapshot gives the index the text had when the
/// snapshot was taken, however the live rope changed since.
#[derive(Debug, Clone, Default)]
pub struct LocationSnapshot {
    /// Per source, `(source range, rope range)` sorted by source offset.
    runs: FxHashMap<SourceId, Vec<(Range, Range)>>,
}

impl LocationSnapshot {
    pub fn new(runs: &[SourceRun]) -> LocationSnapshot {
        let mut by_source: FxHashMap<SourceId, Vec<(Range, Range)>> = FxHashMap::default();
        for run in runs {
            by_source
                .entry(run.source)
                .or_default()
                .push((run.source_range, run.range));
        }
        for runs in by_source.values_mut() {
            runs.sort();
        }
        return LocationSnapshot { runs: by_source };
    }

    pub fn is_empty(&self) -> bool {
        return self.runs.is_empty();
    }

    /// Where `offset` of `source` was, if the snapshot showed it.
    pub fn tracked_location(&self, source: SourceId, offset: usize) -> Option<TrackedLocation> {
        let runs = self.runs.get(&source)?;
        let candidates = runs.partition_point(|(source_range, _)| source_range.start <= offset);
        let (source_range, range) = runs[..candidates]
            .iter()
            .rev()
            .find(|(source_range, _)| source_range.contains(offset))?;
        return Some(TrackedLocation::new(range.start + offset - source_range.start, offset, source));
    }
}
