//! Clamping access for best-effort text processing.
//!
//! Formatting code walks user text that may be malformed. Rather than
//! failing on the first bad index, the helpers here clamp it into range and
//! count the clamp on a shared [`SafeErrors`], which the caller inspects
//! once it is done.

use std::cell::Cell;
use std::rc::Rc;

use super::ops::WHITESPACE;
use super::{Range, Rope};

/// A shared sticky error counter.
#[derive(Debug, Clone, Default)]
pub struct SafeErrors {
    count: Rc<Cell<usize>>,
    cleared_at: Rc<Cell<usize>>,
}

impl SafeErrors {
    pub fn new() -> SafeErrors {
        return SafeErrors::default();
    }

    pub fn add(&self) {
        self.count.set(self.count.get() + 1);
    }

    pub fn count(&self) -> usize {
        return self.count.get();
    }

    pub fn clear(&self) {
        self.count.set(0);
        self.cleared_at.set(0);
    }

    /// True if errors were added since the last clear.
    pub fn had_errors(&self) -> bool {
        return self.count.get() > self.cleared_at.get();
    }

    /// Forget the errors so far for `had_errors`, keeping the count.
    pub fn clear_had_errors(&self) {
        self.cleared_at.set(self.count.get());
    }

    pub fn had_errors_and_clear(&self) -> bool {
        let had = self.had_errors();
        self.clear_had_errors();
        return had;
    }
}

// =============================================================================
// SafeRange
// =============================================================================

/// A clamped window over a rope. Indices are relative to the window.
#[derive(Debug, Clone)]
pub struct SafeRange {
    rope: Rope,
    start: usize,
    end: usize,
    errors: SafeErrors,
    before_start: char,
    after_end: char,
}

impl SafeRange {
    /// The window `[start, end)` of `rope`, clamped into range. Each bound
    /// that needs clamping counts one error.
    pub fn new(rope: Rope, start: isize, end: isize, errors: SafeErrors) -> SafeRange {
        let len = rope.len();
        let start = clamp(start, 0, len, &errors);
        let end = clamp(end, start, len, &errors);
        return SafeRange {
            rope,
            start,
            end,
            errors,
            before_start: '\0',
            after_end: '\0',
        };
    }

    pub fn of(rope: Rope, errors: SafeErrors) -> SafeRange {
        let len = rope.len() as isize;
        return SafeRange::new(rope, 0, len, errors);
    }

    /// The chars `char_at` returns before the start and past the end.
    pub fn with_non_chars(mut self, before_start: char, after_end: char) -> SafeRange {
        self.before_start = before_start;
        self.after_end = after_end;
        return self;
    }

    pub fn errors(&self) -> &SafeErrors {
        return &self.errors;
    }

    pub fn len(&self) -> usize {
        return self.end - self.start;
    }

    pub fn is_empty(&self) -> bool {
        return self.start == self.end;
    }

    /// The window position within the underlying rope.
    pub fn range(&self) -> Range {
        return Range::new(self.start, self.end);
    }

    /// The window content.
    pub fn rope(&self) -> Rope {
        return self.rope.sub_sequence(self.start, self.end);
    }

    /// `index` clamped to `[0, len]`.
    pub fn safe_index(&self, index: isize) -> usize {
        return clamp(index, 0, self.len(), &self.errors);
    }

    /// `index` clamped to `[0, len)`, or 0 when empty.
    pub fn safe_inclusive_index(&self, index: isize) -> usize {
        return clamp(index, 0, self.len().saturating_sub(1), &self.errors);
    }

    pub fn safe_range(&self, start: isize, end: isize) -> Range {
        let start = self.safe_index(start);
        let end = clamp(end, start, self.len(), &self.errors);
        return Range::new(start, end);
    }

    pub fn char_at(&self, index: isize) -> char {
        if index < 0 {
            self.errors.add();
            return self.before_start;
        }
        let index = index as usize;
        if index >= self.len() {
            self.errors.add();
            return self.after_end;
        }
        return self.rope.char_at(self.start + index);
    }

    /// A window inside this one, sharing the error counter.
    pub fn sub_range(&self, start: isize, end: isize) -> SafeRange {
        let range = self.safe_range(start, end);
        return SafeRange {
            rope: self.rope.clone(),
            start: self.start + range.start,
            end: self.start + range.end,
            errors: self.errors.clone(),
            before_start: self.before_start,
            after_end: self.after_end,
        };
    }

    pub fn first_char(&self) -> char {
        return self.char_at(0);
    }

    pub fn last_char(&self) -> char {
        return self.char_at(self.len() as isize - 1);
    }

    pub fn is_blank(&self) -> bool {
        return (self.start..self.end).all(|i| WHITESPACE.contains(&self.rope.char_at(i)));
    }

    /// Char at a window index known to be in range.
    fn at(&self, index: usize) -> char {
        return self.rope.char_at(self.start + index);
    }
}

fn clamp(value: isize, min: usize, max: usize, errors: &SafeErrors) -> usize {
    if value < min as isize {
        errors.add();
        return min;
    }
    if value as usize > max {
        errors.add();
        return max;
    }
    return value as usize;
}

fn is_indent(c: char) -> bool {
    return c == ' ' || c == '\t';
}

// =============================================================================
// SafeIndex
// =============================================================================

/// Line navigation over a [`SafeRange`]. Every index argument is clamped
/// through the range's error counter.
#[derive(Debug, Clone)]
pub struct SafeIndex {
    range: SafeRange,
}

impl SafeIndex {
    pub fn new(range: SafeRange) -> SafeIndex {
        return SafeIndex { range };
    }

    pub fn range(&self) -> &SafeRange {
        return &self.range;
    }

    pub fn start_of_line(&self, index: isize) -> usize {
        let mut index = self.range.safe_index(index);
        while index > 0 && self.range.at(index - 1) != '\n' {
            index -= 1;
        }
        return index;
    }

    /// The index just past the line's `\n`, or the length on the last line.
    pub fn end_of_line(&self, index: isize) -> usize {
        let mut index = self.range.safe_index(index);
        let len = self.range.len();
        while index < len {
            index += 1;
            if self.range.at(index - 1) == '\n' {
                break;
            }
        }
        return index;
    }

    /// The line end without its `\n`.
    fn content_end(&self, index: isize) -> usize {
        let end = self.end_of_line(index);
        if end > 0 && self.range.at(end - 1) == '\n' {
            return end - 1;
        }
        return end;
    }

    /// The first index on the line past its indentation.
    pub fn first_non_blank(&self, index: isize) -> usize {
        let mut at = self.start_of_line(index);
        let end = self.content_end(index);
        while at < end && is_indent(self.range.at(at)) {
            at += 1;
        }
        return at;
    }

    /// The index just past the last non-blank char of the line, or the
    /// line start when it is blank.
    pub fn last_non_blank(&self, index: isize) -> usize {
        let start = self.start_of_line(index);
        let mut at = self.content_end(index);
        while at > start && is_indent(self.range.at(at - 1)) {
            at -= 1;
        }
        return at;
    }

    pub fn indent(&self, index: isize) -> usize {
        return self.first_non_blank(index) - self.start_of_line(index);
    }

    pub fn column(&self, index: isize) -> usize {
        return self.range.safe_index(index) - self.start_of_line(index);
    }

    pub fn is_empty_line(&self, index: isize) -> bool {
        return self.start_of_line(index) == self.content_end(index);
    }

    pub fn is_blank_line(&self, index: isize) -> bool {
        return self.first_non_blank(index) == self.content_end(index);
    }

    pub fn start_of_next_line(&self, index: isize) -> usize {
        return self.end_of_line(index);
    }

    /// The index of the `\n` ending the previous line, or 0 on the first
    /// line.
    pub fn end_of_previous_line(&self, index: isize) -> usize {
        return self.start_of_line(index).saturating_sub(1);
    }
}
