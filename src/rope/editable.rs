//! The one mutable point over persistent ropes.

use std::cell::RefCell;
use std::fmt;

use super::{Rope, SourceId, TrackedLocation};
use crate::error::{Error, Result};
use crate::version::{Serial, Version, VersionRef, VolatileVersion};

/// Holds a rope root and swaps it on every edit.
///
/// Edits build a new root that shares everything they did not touch, then
/// bump this holder's own volatile version. Ropes taken out through
/// [`EditableRope::contents`] stay valid and unchanged.
pub struct EditableRope {
    rope: RefCell<Rope>,
    version: VolatileVersion,
}

impl EditableRope {
    pub fn new(rope: Rope) -> EditableRope {
        return EditableRope {
            rope: RefCell::new(rope),
            version: VolatileVersion::new(),
        };
    }

    pub fn contents(&self) -> Rope {
        return self.rope.borrow().clone();
    }

    pub fn len(&self) -> usize {
        return self.rope.borrow().len();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn char_at(&self, index: usize) -> Result<char> {
        return self.rope.borrow().try_char_at(index);
    }

    fn swap(&self, rope: Rope) {
        *self.rope.borrow_mut() = rope;
        self.version.next_version();
    }

    fn edit(&self, f: impl FnOnce(&Rope) -> Result<Rope>) -> Result<()> {
        let edited = f(&self.rope.borrow())?;
        self.swap(edited);
        return Ok(());
    }

    // ===== Edits =====

    pub fn set_char_at(&self, index: usize, c: char) -> Result<()> {
        let len = self.len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        return self.replace(index, index + 1, &Rope::from_chars(vec![c]));
    }

    /// Overwrite from `start` with `text`, growing the rope if it runs past
    /// the end.
    pub fn set_range(&self, start: usize, text: &Rope) -> Result<()> {
        let len = self.len();
        if start > len {
            return Err(Error::IndexOutOfBounds { index: start, len });
        }
        let end = (start + text.len()).min(len);
        return self.replace(start, end, text);
    }

    pub fn replace(&self, start: usize, end: usize, text: &Rope) -> Result<()> {
        return self.edit(|rope| rope.try_replace(start, end, text));
    }

    pub fn insert(&self, at: usize, text: &Rope) -> Result<()> {
        return self.replace(at, at, text);
    }

    pub fn delete(&self, start: usize, end: usize) -> Result<()> {
        return self.replace(start, end, &Rope::empty());
    }

    pub fn append(&self, text: &Rope) {
        let appended = self.rope.borrow().append_optimized(std::slice::from_ref(text));
        self.swap(appended);
    }

    pub fn clear(&self) {
        self.swap(Rope::empty());
    }

    /// The current contents, leaving the holder empty.
    pub fn take(&self) -> Rope {
        let rope = self.contents();
        self.clear();
        return rope;
    }

    /// Rebuild the root from its leaf parts with adjacent runs fused.
    pub fn flatten(&self) {
        let parts = self.rope.borrow().flattened();
        self.swap(Rope::from_segments(Rope::splice_sequences(parts)));
    }

    pub fn expand_tabs(&self, tab_size: usize) {
        let expanded = self.rope.borrow().expand_tabs(tab_size);
        self.swap(expanded);
    }

    pub fn to_lowercase(&self) {
        let mapped = self.rope.borrow().lowercase();
        self.swap(mapped);
    }

    pub fn to_uppercase(&self) {
        let mapped = self.rope.borrow().uppercase();
        self.swap(mapped);
    }

    // ===== Tracking =====

    pub fn tracked_source_location(&self, index: usize) -> Result<TrackedLocation> {
        return self.rope.borrow().try_tracked_source_location(index);
    }

    pub fn tracked_location(&self, source: Option<SourceId>, offset: usize) -> Option<TrackedLocation> {
        return self.rope.borrow().tracked_location(source, offset);
    }
}

impl Default for EditableRope {
    fn default() -> EditableRope {
        return EditableRope::new(Rope::empty());
    }
}

impl Version for EditableRope {
    fn version_serial(&self) -> Serial {
        return self.version.version_serial();
    }

    fn is_stale(&self) -> bool {
        return false;
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return Vec::new();
    }

    fn next_version(&self) {
        self.version.next_version();
    }
}

impl fmt::Display for EditableRope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return fmt::Display::fmt(&*self.rope.borrow(), f);
    }
}

impl fmt::Debug for EditableRope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("EditableRope")
            .field("rope", &*self.rope.borrow())
            .field("serial", &self.version.version_serial())
            .finish();
    }
}
