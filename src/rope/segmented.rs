//! Ordered children with a cumulative length index.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use super::{Rope, SourceId, TrackedLocation};
use crate::version::{
    refresh, Clock, DependentVersion, ImmutableVersion, Serial, Version, VersionRef, NULL_SERIAL,
};

pub(super) struct Segmented {
    children: Vec<Rope>,
    /// `lengths[i]` is the start index of child `i`; the last entry is the
    /// total length.
    lengths: RefCell<Vec<usize>>,
    /// Present when some child is mutable.
    version: Option<Rc<DependentVersion>>,
    lengths_at: Cell<Serial>,
    last_segment: Cell<usize>,
}

fn cumulative(children: &[Rope]) -> Vec<usize> {
    let mut lengths = Vec::with_capacity(children.len() + 1);
    let mut total = 0;
    lengths.push(0);
    for child in children {
        total += child.len();
        lengths.push(total);
    }
    return lengths;
}

impl Segmented {
    pub(super) fn new(children: Vec<Rope>) -> Segmented {
        return Segmented::new_in(&Clock::current(), children);
    }

    pub(super) fn new_in(clock: &Clock, children: Vec<Rope>) -> Segmented {
        let version = if children.iter().any(Rope::is_mutable) {
            let deps = children.iter().map(Rope::version).collect();
            Some(Rc::new(DependentVersion::new_in(clock, deps)))
        } else {
            None
        };
        let lengths = cumulative(&children);
        let segmented = Segmented {
            children,
            lengths: RefCell::new(lengths),
            version,
            lengths_at: Cell::new(NULL_SERIAL),
            last_segment: Cell::new(0),
        };
        segmented.lengths_at.set(segmented.serial());
        return segmented;
    }

    #[inline]
    pub(super) fn children(&self) -> &[Rope] {
        return &self.children;
    }

    #[inline]
    pub(super) fn is_mutable(&self) -> bool {
        return self.version.is_some();
    }

    /// The clock slices of this node are built on.
    fn clock(&self) -> Clock {
        return match &self.version {
            Some(version) => version.clock().clone(),
            None => Clock::current(),
        };
    }

    pub(super) fn version(&self) -> VersionRef {
        return match &self.version {
            Some(version) => Rc::clone(version) as VersionRef,
            None => Rc::new(ImmutableVersion),
        };
    }

    pub(super) fn serial(&self) -> Serial {
        return match &self.version {
            Some(version) => {
                refresh(version.as_ref());
                version.version_serial()
            }
            None => NULL_SERIAL,
        };
    }

    /// The cumulative lengths, recomputed if a mutable child moved.
    fn lengths(&self) -> Ref<'_, Vec<usize>> {
        if self.version.is_some() {
            let serial = self.serial();
            if serial != self.lengths_at.get() {
                *self.lengths.borrow_mut() = cumulative(&self.children);
                self.lengths_at.set(serial);
            }
        }
        return self.lengths.borrow();
    }

    pub(super) fn len(&self) -> usize {
        return self.lengths().last().copied().unwrap_or(0);
    }

    /// The child containing `index` and its start, skipping empty children.
    /// `index` must be below the total length.
    fn segment_of(&self, index: usize) -> (usize, usize) {
        let lengths = self.lengths();
        let last = self.last_segment.get();
        if last + 1 < lengths.len() && lengths[last] <= index && index < lengths[last + 1] {
            return (last, lengths[last]);
        }
        let segment = lengths.partition_point(|&start| start <= index) - 1;
        self.last_segment.set(segment);
        return (segment, lengths[segment]);
    }

    pub(super) fn char_at(&self, index: usize) -> char {
        let (segment, start) = self.segment_of(index);
        return self.children[segment].char_at_raw(index - start);
    }

    /// `start < end`, not the whole range.
    pub(super) fn sub_sequence(&self, start: usize, end: usize) -> Rope {
        if start == end {
            return Rope::empty();
        }
        let (first, first_start) = self.segment_of(start);
        let (last, last_start) = self.segment_of(end - 1);
        if first == last {
            return self.children[first].sub_sequence(start - first_start, end - first_start);
        }

        let mut parts: SmallVec<[Rope; 8]> = SmallVec::new();
        let head = &self.children[first];
        parts.push(head.sub_sequence(start - first_start, head.len()));
        parts.extend(self.children[first + 1..last].iter().cloned());
        parts.push(self.children[last].sub_sequence(0, end - last_start));
        return Rope::from_segments_in(&self.clock(), parts);
    }

    pub(super) fn source_location(&self, index: usize) -> TrackedLocation {
        let (segment, start) = self.segment_of(index);
        return self.children[segment]
            .tracked_source_location(index - start)
            .shifted(start);
    }

    pub(super) fn tracked_location(&self, source: Option<SourceId>, offset: usize) -> Option<TrackedLocation> {
        let starts: SmallVec<[usize; 8]> = self.lengths().iter().copied().collect();
        for (child, start) in self.children.iter().zip(starts) {
            if let Some(location) = child.tracked_location(source, offset) {
                return Some(location.shifted(start));
            }
        }
        return None;
    }

    /// Splice `other` onto the last child.
    pub(super) fn spliced_with(&self, other: &Rope) -> Option<Rope> {
        let last = self.children.last()?;
        let merged = last.spliced_with(other)?;
        let mut children = self.children.clone();
        let end = children.len() - 1;
        children[end] = merged;
        return Some(Rope::from_segments_in(&self.clock(), children));
    }
}
