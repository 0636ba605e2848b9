//! Half-open index intervals.

use std::fmt;

/// The interval `[start, end)`.
///
/// Ordered by start, then end. Used for rope indices and for the column
/// spans of the table balancer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    /// An empty range is allowed; `end < start` is normalized to `start`.
    #[inline]
    pub fn new(start: usize, end: usize) -> Range {
        return Range { start, end: end.max(start) };
    }

    #[inline]
    pub fn empty(at: usize) -> Range {
        return Range { start: at, end: at };
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.end - self.start;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.start == self.end;
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        return self.start <= index && index < self.end;
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        return self.start <= other.start && other.end <= self.end;
    }

    /// True if some index lies in both.
    pub fn overlaps(&self, other: &Range) -> bool {
        return self.start < other.end && other.start < self.end;
    }

    /// `self` ends exactly where `other` starts.
    #[inline]
    pub fn is_adjacent_before(&self, other: &Range) -> bool {
        return self.end == other.start;
    }

    #[inline]
    pub fn is_adjacent_after(&self, other: &Range) -> bool {
        return other.end == self.start;
    }

    pub fn is_adjacent(&self, other: &Range) -> bool {
        return self.is_adjacent_before(other) || self.is_adjacent_after(other);
    }

    /// The overlap, or an empty range at the nearer boundary.
    pub fn intersect(&self, other: &Range) -> Range {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        return Range::new(start, end);
    }

    /// The smallest range covering both.
    pub fn span(&self, other: &Range) -> Range {
        return Range::new(self.start.min(other.start), self.end.max(other.end));
    }

    pub fn shifted(&self, delta: usize) -> Range {
        return Range::new(self.start + delta, self.end + delta);
    }

    /// Clamp both ends into `[0, len]`.
    pub fn clamped(&self, len: usize) -> Range {
        return Range::new(self.start.min(len), self.end.min(len));
    }

    pub fn iter(&self) -> std::ops::Range<usize> {
        return self.start..self.end;
    }
}

impl From<std::ops::Range<usize>> for Range {
    fn from(range: std::ops::Range<usize>) -> Range {
        return Range::new(range.start, range.end);
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "[{}, {})", self.start, self.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_queries() {
        let range = Range::new(2, 5);
        assert_eq!(range.len(), 3);
        assert!(range.contains(2));
        assert!(!range.contains(5));
        assert!(Range::new(5, 3).is_empty());
        assert_eq!(format!("{:?}", range), "[2, 5)");
    }

    #[test]
    fn test_relations() {
        let a = Range::new(0, 3);
        let b = Range::new(3, 6);
        let c = Range::new(2, 4);
        assert!(a.is_adjacent_before(&b));
        assert!(b.is_adjacent_after(&a));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert_eq!(a.intersect(&c), Range::new(2, 3));
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.span(&b), Range::new(0, 6));
        assert!(Range::new(0, 6).contains_range(&c));
    }

    #[test]
    fn test_ordering() {
        let mut ranges = vec![Range::new(3, 4), Range::new(0, 5), Range::new(0, 2)];
        ranges.sort();
        assert_eq!(ranges, vec![Range::new(0, 2), Range::new(0, 5), Range::new(3, 4)]);
    }
}
