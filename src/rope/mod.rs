//! Persistent character sequences.
//!
//! A [`Rope`] is a cheap handle to an immutable node. Editing never mutates
//! a node: [`Rope::replace`] and friends build a new segmented node that
//! shares the untouched prefix and suffix with the original. Every node can
//! map an index back to the `(offset, source)` it was read from, so text
//! survives any number of edits with its origin intact.
//!
//! # Node variants
//!
//! | Variant    | Content                                         |
//! |------------|-------------------------------------------------|
//! | Leaf       | a run of a shared `char` array                  |
//! | View       | a run of any [`CharSource`]                     |
//! | Segmented  | ordered children with a cumulative length index |
//! | Mapped     | a child with a per-char [`CharMapper`]          |
//! | Reversed   | a child read back to front                      |
//! | Replaced   | new text standing in for a child                |
//! | Repeated   | a char run repeated over a range                |
//! | Live       | a [`Variable`] or [`Paragraph`] laid out from   |
//! |            | versioned cells                                 |
//! | Null       | the zero length marker for missing groups       |
//!
//! Adjacent runs of the same backing array are fused by
//! [`Rope::splice_sequences`]; fusion never changes content.
//!
//! # Versions
//!
//! Nodes built only from leaves are immutable. A node holding a live
//! [`Variable`] or [`Paragraph`] anywhere below it is mutable: its content follows the cells
//! the variable is bound to, and [`Rope::version`] reports when it moved.

use std::cell::RefCell;
use std::fmt;
use std::fmt::Write;
use std::rc::Rc;

use log::trace;

use crate::error::{Error, Result};
use crate::version::{Clock, ImmutableVersion, Serial, Version, VersionRef, NULL_SERIAL};

pub mod editable;
pub mod location;
mod ops;
pub mod paragraph;
pub mod range;
pub mod safe;
mod segmented;
pub mod text_block;
pub mod variable;

pub use editable::EditableRope;
pub use location::{LocationSnapshot, SourceId, TrackedLocation};
pub use paragraph::Paragraph;
pub use range::Range;
pub use text_block::TextBlock;
pub use variable::{TextAlignment, Variable};

use segmented::Segmented;

/// Text laid out from versioned cells, shown through a rope node that
/// follows it as the cells change.
pub(crate) trait LiveText: Version {
    fn text(&self) -> Rope;

    /// The serial of the text, brought up to date first.
    fn text_serial(&self) -> Serial;

    fn into_version(self: Rc<Self>) -> VersionRef;
}

/// Host text readable by index.
///
/// Implementors that keep their characters in one contiguous slice can
/// expose it through `as_slice`, which lets ropes copy runs in bulk.
pub trait CharSource {
    fn len(&self) -> usize;

    fn char_at(&self, index: usize) -> char;

    fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    fn as_slice(&self) -> Option<&[char]> {
        return None;
    }
}

impl CharSource for Vec<char> {
    fn len(&self) -> usize {
        return Vec::len(self);
    }

    fn char_at(&self, index: usize) -> char {
        return self[index];
    }

    fn as_slice(&self) -> Option<&[char]> {
        return Some(self);
    }
}

/// A per-character transform.
#[derive(Clone)]
pub enum CharMapper {
    Lowercase,
    Uppercase,
    Custom(Rc<dyn Fn(char) -> char>),
}

impl CharMapper {
    pub fn custom(map: impl Fn(char) -> char + 'static) -> CharMapper {
        return CharMapper::Custom(Rc::new(map));
    }

    /// Case mappings that expand to several chars keep only the first, so
    /// a mapped rope always has the length of its base.
    pub fn map(&self, c: char) -> char {
        return match self {
            CharMapper::Lowercase => c.to_lowercase().next().unwrap_or(c),
            CharMapper::Uppercase => c.to_uppercase().next().unwrap_or(c),
            CharMapper::Custom(map) => map(c),
        };
    }

    pub fn same(&self, other: &CharMapper) -> bool {
        return match (self, other) {
            (CharMapper::Lowercase, CharMapper::Lowercase) => true,
            (CharMapper::Uppercase, CharMapper::Uppercase) => true,
            (CharMapper::Custom(a), CharMapper::Custom(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
    }
}

impl fmt::Debug for CharMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            CharMapper::Lowercase => f.write_str("Lowercase"),
            CharMapper::Uppercase => f.write_str("Uppercase"),
            CharMapper::Custom(_) => f.write_str("Custom"),
        };
    }
}

/// One contiguous run of source text backing part of a rope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRun {
    pub source: SourceId,
    /// Indices in the rope.
    pub range: Range,
    /// Offsets in the source.
    pub source_range: Range,
}

// =============================================================================
// Nodes
// =============================================================================

struct Leaf {
    chars: Rc<[char]>,
    start: usize,
    end: usize,
    /// Set on flattened proxies: tracking and slicing go to the original.
    origin: Option<Rope>,
}

struct View {
    source: Rc<dyn CharSource>,
    start: usize,
    end: usize,
}

struct Repeated {
    chars: Rc<[char]>,
    start: usize,
    end: usize,
}

enum Kind {
    Null,
    Leaf(Leaf),
    View(View),
    Segmented(Segmented),
    Mapped(Rope, CharMapper),
    Reversed(Rope),
    Replaced { replaced: Rope, chars: Rope },
    Repeated(Repeated),
    Live(Rc<dyn LiveText>),
}

struct Node {
    kind: Kind,
    /// Flattened content and the serial it was taken at.
    proxy: RefCell<Option<(Serial, Rc<[char]>)>>,
}

#[derive(Clone)]
pub struct Rope {
    node: Rc<Node>,
}

impl Rope {
    fn new(kind: Kind) -> Rope {
        return Rope {
            node: Rc::new(Node {
                kind,
                proxy: RefCell::new(None),
            }),
        };
    }

    fn leaf(chars: Rc<[char]>, start: usize, end: usize) -> Rope {
        return Rope::new(Kind::Leaf(Leaf {
            chars,
            start,
            end,
            origin: None,
        }));
    }

    pub fn empty() -> Rope {
        return Rope::leaf(Rc::from(Vec::new()), 0, 0);
    }

    /// The zero length marker standing in for an unmatched group.
    pub fn null() -> Rope {
        return Rope::new(Kind::Null);
    }

    pub fn from_chars(chars: Vec<char>) -> Rope {
        let len = chars.len();
        return Rope::leaf(Rc::from(chars), 0, len);
    }

    /// Wrap host text without copying it.
    pub fn from_source(source: Rc<dyn CharSource>) -> Rope {
        let end = source.len();
        return Rope::new(Kind::View(View { source, start: 0, end }));
    }

    /// `count` copies of `c`.
    pub fn repeated(c: char, count: usize) -> Rope {
        return Rope::new(Kind::Repeated(Repeated {
            chars: Rc::from(vec![c]),
            start: 0,
            end: count,
        }));
    }

    /// `text` repeated `count` times.
    pub fn repeated_str(text: &str, count: usize) -> Rope {
        let chars: Rc<[char]> = text.chars().collect();
        let end = chars.len() * count;
        return Rope::new(Kind::Repeated(Repeated { chars, start: 0, end }));
    }

    /// A rope whose content is the variable's current result.
    pub fn from_variable(variable: Rc<Variable>) -> Rope {
        return Rope::new(Kind::Live(variable));
    }

    pub(crate) fn from_live(live: Rc<dyn LiveText>) -> Rope {
        return Rope::new(Kind::Live(live));
    }

    /// Join `parts` under one segmented node. A single part is returned as
    /// is and no parts give an empty rope.
    pub fn from_segments(parts: impl IntoIterator<Item = Rope>) -> Rope {
        return Rope::from_segments_in(&Clock::current(), parts);
    }

    /// [`Rope::from_segments`] with mutable children tracked on `clock`.
    pub fn from_segments_in(clock: &Clock, parts: impl IntoIterator<Item = Rope>) -> Rope {
        let mut children: Vec<Rope> = parts.into_iter().collect();
        return match children.len() {
            0 => Rope::empty(),
            1 => children.remove(0),
            _ => Rope::new(Kind::Segmented(Segmented::new_in(clock, children))),
        };
    }

    /// Like [`Rope::from_segments`], with segmented parts replaced by their
    /// children so the result is one level deep.
    pub fn from_segments_flat(parts: impl IntoIterator<Item = Rope>) -> Rope {
        return Rope::from_segments_flat_in(&Clock::current(), parts);
    }

    pub fn from_segments_flat_in(clock: &Clock, parts: impl IntoIterator<Item = Rope>) -> Rope {
        let mut flat = Vec::new();
        for part in parts {
            part.flatten_into(&mut flat);
        }
        return Rope::from_segments_in(clock, flat);
    }

    /// Flatten `parts`, drop empty immutable ones and fuse adjacent runs.
    pub fn splice_sequences(parts: impl IntoIterator<Item = Rope>) -> Vec<Rope> {
        let mut flat = Vec::new();
        for part in parts {
            part.flatten_into(&mut flat);
        }

        let mut result: Vec<Rope> = Vec::with_capacity(flat.len());
        for part in flat {
            if part.is_empty() && !part.is_mutable() {
                continue;
            }
            if let Some(last) = result.last_mut() {
                if let Some(merged) = last.spliced_with(&part) {
                    *last = merged;
                    continue;
                }
            }
            result.push(part);
        }
        return result;
    }

    // ===== Basic access =====

    pub fn len(&self) -> usize {
        return match &self.node.kind {
            Kind::Null => 0,
            Kind::Leaf(leaf) => leaf.end - leaf.start,
            Kind::View(view) => view.end - view.start,
            Kind::Segmented(segmented) => segmented.len(),
            Kind::Mapped(base, _) | Kind::Reversed(base) => base.len(),
            Kind::Replaced { chars, .. } => chars.len(),
            Kind::Repeated(repeated) => repeated.end - repeated.start,
            Kind::Live(live) => live.text().len(),
        };
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        return matches!(self.node.kind, Kind::Null);
    }

    /// True if both handles point at the same node.
    #[inline]
    pub fn ptr_eq(&self, other: &Rope) -> bool {
        return Rc::ptr_eq(&self.node, &other.node);
    }

    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn char_at(&self, index: usize) -> char {
        return match self.try_char_at(index) {
            Ok(c) => c,
            Err(error) => panic!("{error}"),
        };
    }

    pub fn try_char_at(&self, index: usize) -> Result<char> {
        let len = self.len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        if let Some(chars) = self.fresh_proxy() {
            return Ok(chars[index]);
        }
        return Ok(self.char_at_raw(index));
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<char> {
        return self.try_char_at(index).ok();
    }

    pub(crate) fn char_at_raw(&self, index: usize) -> char {
        return match &self.node.kind {
            Kind::Null => unreachable!("null rope has no chars"),
            Kind::Leaf(leaf) => leaf.chars[leaf.start + index],
            Kind::View(view) => view.source.char_at(view.start + index),
            Kind::Segmented(segmented) => segmented.char_at(index),
            Kind::Mapped(base, mapper) => mapper.map(base.char_at_raw(index)),
            Kind::Reversed(base) => base.char_at_raw(base.len() - 1 - index),
            Kind::Replaced { chars, .. } => chars.char_at_raw(index),
            Kind::Repeated(repeated) => repeated.chars[(repeated.start + index) % repeated.chars.len()],
            Kind::Live(live) => live.text().char_at_raw(index),
        };
    }

    /// # Panics
    ///
    /// Panics unless `start <= end <= len`.
    pub fn sub_sequence(&self, start: usize, end: usize) -> Rope {
        return match self.try_sub_sequence(start, end) {
            Ok(rope) => rope,
            Err(error) => panic!("{error}"),
        };
    }

    pub fn try_sub_sequence(&self, start: usize, end: usize) -> Result<Rope> {
        let len = self.len();
        if start > end || end > len {
            return Err(Error::RangeOutOfBounds { start, end, len });
        }
        if start == 0 && end == len {
            return Ok(self.clone());
        }
        return Ok(self.proper_sub_sequence(start, end));
    }

    fn proper_sub_sequence(&self, start: usize, end: usize) -> Rope {
        return match &self.node.kind {
            Kind::Null => self.clone(),
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.proper_sub_sequence(start, end),
                None => Rope::leaf(Rc::clone(&leaf.chars), leaf.start + start, leaf.start + end),
            },
            Kind::View(view) => Rope::new(Kind::View(View {
                source: Rc::clone(&view.source),
                start: view.start + start,
                end: view.start + end,
            })),
            Kind::Segmented(segmented) => segmented.sub_sequence(start, end),
            Kind::Mapped(base, mapper) => {
                Rope::new(Kind::Mapped(base.proper_sub_sequence(start, end), mapper.clone()))
            }
            Kind::Reversed(base) => {
                let len = base.len();
                Rope::new(Kind::Reversed(base.proper_sub_sequence(len - end, len - start)))
            }
            Kind::Replaced { replaced, chars } => Rope::new(Kind::Replaced {
                replaced: replaced.clone(),
                chars: chars.proper_sub_sequence(start, end),
            }),
            Kind::Repeated(repeated) => Rope::new(Kind::Repeated(Repeated {
                chars: Rc::clone(&repeated.chars),
                start: repeated.start + start,
                end: repeated.start + end,
            })),
            Kind::Live(live) => live.text().proper_sub_sequence(start, end),
        };
    }

    /// Call `f` with the content as one slice, flattening through the
    /// cached proxy when the rope is not a plain leaf.
    pub fn with_chars<R>(&self, f: impl FnOnce(&[char]) -> R) -> R {
        if let Kind::Leaf(leaf) = &self.node.kind {
            return f(&leaf.chars[leaf.start..leaf.end]);
        }
        let chars = self.proxy_chars();
        return f(&chars);
    }

    pub fn to_chars(&self) -> Vec<char> {
        return self.with_chars(<[char]>::to_vec);
    }

    pub fn chars(&self) -> std::vec::IntoIter<char> {
        return self.to_chars().into_iter();
    }

    fn write_chars(&self, out: &mut Vec<char>) {
        if let Some(chars) = self.fresh_proxy() {
            out.extend_from_slice(&chars);
            return;
        }
        match &self.node.kind {
            Kind::Null => {}
            Kind::Leaf(leaf) => out.extend_from_slice(&leaf.chars[leaf.start..leaf.end]),
            Kind::View(view) => match view.source.as_slice() {
                Some(slice) => out.extend_from_slice(&slice[view.start..view.end]),
                None => out.extend((view.start..view.end).map(|i| view.source.char_at(i))),
            },
            Kind::Segmented(segmented) => {
                for child in segmented.children() {
                    child.write_chars(out);
                }
            }
            Kind::Mapped(base, mapper) => {
                let start = out.len();
                base.write_chars(out);
                for c in &mut out[start..] {
                    *c = mapper.map(*c);
                }
            }
            Kind::Reversed(base) => {
                let start = out.len();
                base.write_chars(out);
                out[start..].reverse();
            }
            Kind::Replaced { chars, .. } => chars.write_chars(out),
            Kind::Repeated(repeated) => {
                let n = repeated.chars.len();
                out.extend((repeated.start..repeated.end).map(|i| repeated.chars[i % n]));
            }
            Kind::Live(live) => live.text().write_chars(out),
        }
    }

    // ===== Versions and proxies =====

    pub fn is_mutable(&self) -> bool {
        return match &self.node.kind {
            Kind::Null | Kind::View(_) | Kind::Repeated(_) => false,
            Kind::Leaf(leaf) => leaf.origin.as_ref().is_some_and(Rope::is_mutable),
            Kind::Segmented(segmented) => segmented.is_mutable(),
            Kind::Mapped(base, _) | Kind::Reversed(base) => base.is_mutable(),
            Kind::Replaced { chars, .. } => chars.is_mutable(),
            Kind::Live(_) => true,
        };
    }

    pub fn version(&self) -> VersionRef {
        return match &self.node.kind {
            Kind::Null | Kind::View(_) | Kind::Repeated(_) => Rc::new(ImmutableVersion),
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.version(),
                None => Rc::new(ImmutableVersion),
            },
            Kind::Segmented(segmented) => segmented.version(),
            Kind::Mapped(base, _) | Kind::Reversed(base) => base.version(),
            Kind::Replaced { chars, .. } => chars.version(),
            Kind::Live(live) => Rc::clone(live).into_version(),
        };
    }

    /// The up to date serial of this node's content.
    pub(crate) fn serial(&self) -> Serial {
        return match &self.node.kind {
            Kind::Null | Kind::View(_) | Kind::Repeated(_) => NULL_SERIAL,
            Kind::Leaf(leaf) => leaf.origin.as_ref().map_or(NULL_SERIAL, Rope::serial),
            Kind::Segmented(segmented) => segmented.serial(),
            Kind::Mapped(base, _) | Kind::Reversed(base) => base.serial(),
            Kind::Replaced { chars, .. } => chars.serial(),
            Kind::Live(live) => live.text_serial(),
        };
    }

    fn fresh_proxy(&self) -> Option<Rc<[char]>> {
        let cached = match &*self.node.proxy.borrow() {
            Some((serial, chars)) => Some((*serial, Rc::clone(chars))),
            None => None,
        };
        let (serial, chars) = cached?;
        if serial != self.serial() {
            return None;
        }
        return Some(chars);
    }

    fn proxy_chars(&self) -> Rc<[char]> {
        if let Some(chars) = self.fresh_proxy() {
            return chars;
        }
        let serial = self.serial();
        let mut out = Vec::with_capacity(self.len());
        self.write_chars(&mut out);
        trace!("flattened rope proxy of {} chars at serial {}", out.len(), serial);
        let chars: Rc<[char]> = Rc::from(out);
        *self.node.proxy.borrow_mut() = Some((serial, Rc::clone(&chars)));
        return chars;
    }

    /// A flat array-backed copy for fast reads. Tracking and slicing on the
    /// proxy still go through this rope. Reused until the content moves.
    pub fn cached_proxy(&self) -> Rope {
        if let Kind::Leaf(Leaf { origin: None, .. }) = &self.node.kind {
            return self.clone();
        }
        let chars = self.proxy_chars();
        let end = chars.len();
        return Rope::new(Kind::Leaf(Leaf {
            chars,
            start: 0,
            end,
            origin: Some(self.clone()),
        }));
    }

    // ===== Location tracking =====

    /// The source location of the char at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn tracked_source_location(&self, index: usize) -> TrackedLocation {
        return match self.try_tracked_source_location(index) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        };
    }

    pub fn try_tracked_source_location(&self, index: usize) -> Result<TrackedLocation> {
        let len = self.len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        return Ok(self.source_location_raw(index));
    }

    fn source_location_raw(&self, index: usize) -> TrackedLocation {
        return match &self.node.kind {
            Kind::Null => unreachable!("null rope has no chars"),
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.source_location_raw(index),
                None => TrackedLocation::new(index, leaf.start + index, SourceId::of(&leaf.chars)),
            },
            Kind::View(view) => TrackedLocation::new(index, view.start + index, SourceId::of(&view.source)),
            Kind::Segmented(segmented) => segmented.source_location(index),
            Kind::Mapped(base, _) => base.source_location_raw(index),
            Kind::Reversed(base) => base.source_location_raw(base.len() - 1 - index).at_index(index),
            Kind::Replaced { replaced, chars } => {
                let replaced_len = replaced.len();
                if replaced_len == 0 {
                    return chars.source_location_raw(index);
                }
                replaced
                    .source_location_raw(index.min(replaced_len - 1))
                    .at_index(index)
            }
            Kind::Repeated(repeated) => {
                TrackedLocation::new(index, repeated.start + index, SourceId::of(&repeated.chars))
            }
            Kind::Live(live) => live.text().source_location_raw(index),
        };
    }

    /// The index holding `offset` of `source`, if this rope still contains
    /// it. `None` for the source matches any backing store.
    pub fn tracked_location(&self, source: Option<SourceId>, offset: usize) -> Option<TrackedLocation> {
        let matches = |id: SourceId| source.is_none_or(|source| source == id);
        return match &self.node.kind {
            Kind::Null | Kind::Repeated(_) => None,
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.tracked_location(source, offset),
                None => {
                    let id = SourceId::of(&leaf.chars);
                    let found = matches(id) && leaf.start <= offset && offset < leaf.end;
                    found.then(|| TrackedLocation::new(offset - leaf.start, offset, id))
                }
            },
            Kind::View(view) => {
                let id = SourceId::of(&view.source);
                let found = matches(id) && view.start <= offset && offset < view.end;
                found.then(|| TrackedLocation::new(offset - view.start, offset, id))
            }
            Kind::Segmented(segmented) => segmented.tracked_location(source, offset),
            Kind::Mapped(base, _) => base.tracked_location(source, offset),
            Kind::Reversed(base) => {
                let len = base.len();
                let location = base.tracked_location(source, offset)?;
                Some(location.at_index(len - 1 - location.index))
            }
            Kind::Replaced { replaced, chars } => {
                let location = replaced.tracked_location(source, offset)?;
                if chars.len() < replaced.len() {
                    return Some(location.clamped(chars.len()));
                }
                Some(location)
            }
            Kind::Live(live) => live.text().tracked_location(source, offset),
        };
    }

    /// The backing store of a rope that reads from exactly one.
    pub fn source_id(&self) -> Option<SourceId> {
        return match &self.node.kind {
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.source_id(),
                None => Some(SourceId::of(&leaf.chars)),
            },
            Kind::View(view) => Some(SourceId::of(&view.source)),
            Kind::Mapped(base, _) | Kind::Reversed(base) => base.source_id(),
            _ => None,
        };
    }

    /// Runs of consecutive source offsets backing this rope, in index
    /// order. Reversed and padding content contributes no runs.
    pub fn source_ranges(&self) -> Vec<SourceRun> {
        let mut runs = Vec::new();
        self.collect_runs(0, &mut runs);
        return runs;
    }

    /// The current source runs, frozen for later offset lookups.
    pub fn location_snapshot(&self) -> LocationSnapshot {
        return LocationSnapshot::new(&self.source_ranges());
    }

    fn collect_runs(&self, at: usize, runs: &mut Vec<SourceRun>) {
        match &self.node.kind {
            Kind::Null | Kind::Reversed(_) | Kind::Repeated(_) => {}
            Kind::Leaf(leaf) => match &leaf.origin {
                Some(origin) => origin.collect_runs(at, runs),
                None => push_run(runs, at, SourceId::of(&leaf.chars), leaf.start, leaf.end),
            },
            Kind::View(view) => push_run(runs, at, SourceId::of(&view.source), view.start, view.end),
            Kind::Segmented(segmented) => {
                let mut offset = at;
                for child in segmented.children() {
                    child.collect_runs(offset, runs);
                    offset += child.len();
                }
            }
            Kind::Mapped(base, _) => base.collect_runs(at, runs),
            Kind::Replaced { replaced, chars } => {
                if replaced.len() == chars.len() {
                    replaced.collect_runs(at, runs);
                }
            }
            Kind::Live(live) => live.text().collect_runs(at, runs),
        }
    }

    // ===== Structure =====

    /// The leaf-level parts of this rope, in order.
    pub fn flattened(&self) -> Vec<Rope> {
        let mut parts = Vec::new();
        self.flatten_into(&mut parts);
        return parts;
    }

    fn flatten_into(&self, parts: &mut Vec<Rope>) {
        match &self.node.kind {
            Kind::Segmented(segmented) => {
                for child in segmented.children() {
                    child.flatten_into(parts);
                }
            }
            _ => parts.push(self.clone()),
        }
    }

    /// This rope as a segmented node.
    pub fn segmented(&self) -> Rope {
        if let Kind::Segmented(_) = &self.node.kind {
            return self.clone();
        }
        return Rope::new(Kind::Segmented(Segmented::new(vec![self.clone()])));
    }

    /// Number of direct children of a segmented rope, 1 otherwise.
    pub fn segment_count(&self) -> usize {
        return match &self.node.kind {
            Kind::Segmented(segmented) => segmented.children().len(),
            _ => 1,
        };
    }

    /// Fuse `other` onto the end of this rope when both read adjacent runs
    /// of the same store.
    pub fn spliced_with(&self, other: &Rope) -> Option<Rope> {
        return match (&self.node.kind, &other.node.kind) {
            (Kind::Leaf(a), Kind::Leaf(b)) => {
                let fusable = a.origin.is_none()
                    && b.origin.is_none()
                    && Rc::ptr_eq(&a.chars, &b.chars)
                    && a.end == b.start;
                fusable.then(|| Rope::leaf(Rc::clone(&a.chars), a.start, b.end))
            }
            (Kind::View(a), Kind::View(b)) => {
                let fusable = SourceId::of(&a.source) == SourceId::of(&b.source) && a.end == b.start;
                fusable.then(|| {
                    Rope::new(Kind::View(View {
                        source: Rc::clone(&a.source),
                        start: a.start,
                        end: b.end,
                    }))
                })
            }
            (Kind::Repeated(a), Kind::Repeated(b)) => {
                let fusable = Rc::ptr_eq(&a.chars, &b.chars) && a.end == b.start;
                fusable.then(|| {
                    Rope::new(Kind::Repeated(Repeated {
                        chars: Rc::clone(&a.chars),
                        start: a.start,
                        end: b.end,
                    }))
                })
            }
            (Kind::Segmented(segmented), _) => segmented.spliced_with(other),
            (Kind::Mapped(a, mapper), Kind::Mapped(b, other_mapper)) if mapper.same(other_mapper) => {
                let merged = a.spliced_with(b)?;
                Some(Rope::new(Kind::Mapped(merged, mapper.clone())))
            }
            (Kind::Reversed(a), Kind::Reversed(b)) => {
                // Reversed content of `a` then `b` reads `b` then `a` forwards.
                let merged = b.spliced_with(a)?;
                Some(Rope::new(Kind::Reversed(merged)))
            }
            _ => None,
        };
    }

    // ===== Transforms =====

    /// Applying `reversed` twice gives back the original node.
    pub fn reversed(&self) -> Rope {
        return match &self.node.kind {
            Kind::Reversed(base) => base.clone(),
            _ if self.is_empty() && !self.is_mutable() => self.clone(),
            _ => Rope::new(Kind::Reversed(self.clone())),
        };
    }

    /// Mapping with the mapper already applied returns this rope unchanged.
    pub fn mapped(&self, mapper: CharMapper) -> Rope {
        if let Kind::Mapped(_, existing) = &self.node.kind {
            if existing.same(&mapper) {
                return self.clone();
            }
        }
        return Rope::new(Kind::Mapped(self.clone(), mapper));
    }

    pub fn lowercase(&self) -> Rope {
        return self.mapped(CharMapper::Lowercase);
    }

    pub fn uppercase(&self) -> Rope {
        return self.mapped(CharMapper::Uppercase);
    }

    /// `chars` shown in place of this rope; tracking still maps to this
    /// rope's sources.
    pub fn replaced_by(&self, chars: Rope) -> Rope {
        return Rope::new(Kind::Replaced {
            replaced: self.clone(),
            chars,
        });
    }

    // ===== Editing =====

    /// A new rope with `[start, end)` replaced by `text`.
    ///
    /// # Panics
    ///
    /// Panics unless `start <= end <= len`.
    pub fn replace(&self, start: usize, end: usize, text: &Rope) -> Rope {
        return match self.try_replace(start, end, text) {
            Ok(rope) => rope,
            Err(error) => panic!("{error}"),
        };
    }

    pub fn try_replace(&self, start: usize, end: usize, text: &Rope) -> Result<Rope> {
        let len = self.len();
        if start > end || end > len {
            return Err(Error::RangeOutOfBounds { start, end, len });
        }

        let removable = text.is_empty() && !text.is_mutable();
        if start == end && removable {
            return Ok(self.clone());
        }
        if removable && start == 0 && end == len {
            return Ok(Rope::empty());
        }

        let mut parts: Vec<Rope> = Vec::with_capacity(3);
        if start > 0 {
            parts.push(self.proper_sub_sequence(0, start));
        }
        if !removable {
            parts.push(text.clone());
        }
        if end < len {
            parts.push(self.proper_sub_sequence(end, len));
        }
        return Ok(Rope::from_segments_flat(parts));
    }

    pub fn insert(&self, at: usize, text: &Rope) -> Rope {
        return self.replace(at, at, text);
    }

    pub fn delete(&self, start: usize, end: usize) -> Rope {
        return self.replace(start, end, &Rope::empty());
    }

    /// This rope's parts followed by `others`, under one segmented node.
    pub fn append(&self, others: &[Rope]) -> Rope {
        let mut parts = self.flattened();
        parts.extend(others.iter().cloned());
        return Rope::from_segments(parts);
    }

    /// Like [`Rope::append`], fusing adjacent runs and dropping empty
    /// immutable parts.
    pub fn append_optimized(&self, others: &[Rope]) -> Rope {
        let mut parts = self.flattened();
        parts.extend(others.iter().cloned());
        return Rope::from_segments(Rope::splice_sequences(parts));
    }
}

/// Append a run, merging it into the previous one when both continue the
/// same source without a gap.
fn push_run(runs: &mut Vec<SourceRun>, at: usize, source: SourceId, start: usize, end: usize) {
    if start == end {
        return;
    }
    let range = Range::new(at, at + end - start);
    if let Some(last) = runs.last_mut() {
        if last.source == source && last.range.end == at && last.source_range.end == start {
            last.range.end = range.end;
            last.source_range.end = end;
            return;
        }
    }
    runs.push(SourceRun {
        source,
        range,
        source_range: Range::new(start, end),
    });
}

impl Default for Rope {
    fn default() -> Rope {
        return Rope::empty();
    }
}

impl From<&str> for Rope {
    fn from(text: &str) -> Rope {
        return Rope::from_chars(text.chars().collect());
    }
}

impl From<String> for Rope {
    fn from(text: String) -> Rope {
        return Rope::from(text.as_str());
    }
}

impl From<Vec<char>> for Rope {
    fn from(chars: Vec<char>) -> Rope {
        return Rope::from_chars(chars);
    }
}

impl fmt::Display for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return self.with_chars(|chars| {
            for c in chars {
                f.write_char(*c)?;
            }
            return Ok(());
        });
    }
}

impl fmt::Debug for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "Rope({:?})", self.to_string());
    }
}

/// Content equality.
impl PartialEq for Rope {
    fn eq(&self, other: &Rope) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        return self.with_chars(|a| other.with_chars(|b| a == b));
    }
}

impl Eq for Rope {}

impl PartialEq<str> for Rope {
    fn eq(&self, other: &str) -> bool {
        return self.with_chars(|chars| chars.iter().copied().eq(other.chars()));
    }
}

impl PartialEq<&str> for Rope {
    fn eq(&self, other: &&str) -> bool {
        return self == *other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_access() {
        let rope = Rope::from("hello");
        assert_eq!(rope.len(), 5);
        assert_eq!(rope.char_at(1), 'e');
        assert_eq!(rope.get(5), None);
        assert_eq!(rope.try_char_at(7), Err(Error::IndexOutOfBounds { index: 7, len: 5 }));
        assert_eq!(rope.to_string(), "hello");
        assert_eq!(rope.sub_sequence(1, 4), "ell");
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_sub_sequence_out_of_bounds_panics() {
        Rope::from("abc").sub_sequence(2, 5);
    }

    #[test]
    fn test_replace_shares_and_tracks() {
        let rope = Rope::from("hello world");
        let source = rope.source_id();
        let edited = rope.replace(0, 5, &Rope::from("goodbye"));
        assert_eq!(edited, "goodbye world");
        assert_eq!(edited.len(), rope.len() - 5 + 7);

        let location = edited.tracked_source_location(8);
        assert_eq!(location.index, 8);
        assert_eq!(location.offset, 6);
        assert_eq!(Some(location.source), source);

        let found = edited.tracked_location(source, 6).unwrap();
        assert_eq!(found.index, 8);
        assert!(edited.tracked_location(source, 2).is_none());
    }

    #[test]
    fn test_insert_delete() {
        let rope = Rope::from("abef");
        let inserted = rope.insert(2, &Rope::from("cd"));
        assert_eq!(inserted, "abcdef");
        assert_eq!(inserted.delete(1, 5), "af");
        assert_eq!(inserted.delete(0, 6), "");
        assert!(rope.insert(2, &Rope::empty()).ptr_eq(&rope));
    }

    #[test]
    fn test_splice_fuses_adjacent_runs() {
        let rope = Rope::from("abcdef");
        let left = rope.sub_sequence(0, 2);
        let right = rope.sub_sequence(2, 5);
        let fused = left.spliced_with(&right).unwrap();
        assert_eq!(fused, "abcde");
        assert_eq!(fused.source_id(), rope.source_id());
        assert!(right.spliced_with(&left).is_none());

        let parts = Rope::splice_sequences(vec![left, Rope::empty(), right, Rope::from("x")]);
        assert_eq!(parts.len(), 2);
        assert_eq!(Rope::from_segments(parts), "abcdex");
    }

    #[test]
    fn test_segmented_sub_sequence() {
        let rope = Rope::from_segments(vec![Rope::from("ab"), Rope::empty(), Rope::from("cd"), Rope::from("ef")]);
        assert_eq!(rope.len(), 6);
        assert_eq!(rope.char_at(2), 'c');
        assert_eq!(rope.sub_sequence(1, 5), "bcde");
        assert_eq!(rope.sub_sequence(2, 4), "cd");
        assert_eq!(rope.sub_sequence(3, 3), "");
        for i in 0..rope.len() {
            assert_eq!(rope.tracked_source_location(i).index, i);
        }
    }

    #[test]
    fn test_reversed_and_mapped() {
        let rope = Rope::from("Hello");
        let reversed = rope.reversed();
        assert_eq!(reversed, "olleH");
        assert!(reversed.reversed().ptr_eq(&rope));
        assert_eq!(reversed.sub_sequence(1, 3), "ll");
        assert_eq!(reversed.tracked_source_location(0).offset, 4);

        let lower = rope.lowercase();
        assert_eq!(lower, "hello");
        assert!(lower.lowercase().ptr_eq(&lower));
        assert_eq!(rope.uppercase(), "HELLO");
        assert_eq!(lower.sub_sequence(0, 2), "he");
    }

    #[test]
    fn test_reversed_splice() {
        let rope = Rope::from("abcd");
        let a = rope.sub_sequence(2, 4).reversed();
        let b = rope.sub_sequence(0, 2).reversed();
        let naive = format!("{a}{b}");
        let fused = a.spliced_with(&b).unwrap();
        assert_eq!(fused.to_string(), naive);
    }

    #[test]
    fn test_replaced_clamps_locations() {
        let rope = Rope::from("a\tb");
        let tab = rope.sub_sequence(1, 2);
        let replaced = tab.replaced_by(Rope::repeated(' ', 3));
        assert_eq!(replaced, "   ");
        assert_eq!(replaced.tracked_source_location(2).offset, 1);
        assert_eq!(replaced.tracked_source_location(2).index, 2);

        let short = rope.replaced_by(Rope::from("x"));
        let location = short.tracked_location(rope.source_id(), 2).unwrap();
        assert_eq!(location.index, 1);
    }

    #[test]
    fn test_repeated() {
        let dashes = Rope::repeated_str("-=", 3);
        assert_eq!(dashes, "-=-=-=");
        assert_eq!(dashes.sub_sequence(1, 4), "=-=");
        assert!(dashes.tracked_location(None, 0).is_none());
    }

    #[test]
    fn test_view_over_host_text() {
        let host: Rc<dyn CharSource> = Rc::new("view text".chars().collect::<Vec<char>>());
        let rope = Rope::from_source(Rc::clone(&host));
        let word = rope.sub_sequence(5, 9);
        assert_eq!(word, "text");
        assert_eq!(word.tracked_source_location(0).offset, 5);
        let fused = rope.sub_sequence(0, 5).spliced_with(&word).unwrap();
        assert_eq!(fused, "view text");
    }

    #[test]
    fn test_cached_proxy_tracks_origin() {
        let rope = Rope::from("abc").append(&[Rope::from("def")]);
        let proxy = rope.cached_proxy();
        assert_eq!(proxy, "abcdef");
        assert_eq!(proxy.tracked_source_location(4), rope.tracked_source_location(4));
        assert_eq!(proxy.sub_sequence(2, 4), "cd");
    }

    #[test]
    fn test_source_ranges_merge() {
        let rope = Rope::from("abcdef");
        let source = rope.source_id().unwrap();
        let parts = Rope::from_segments(vec![rope.sub_sequence(0, 2), rope.sub_sequence(2, 4), Rope::repeated(' ', 2)]);
        let runs = parts.source_ranges();
        assert_eq!(
            runs,
            vec![SourceRun {
                source,
                range: Range::new(0, 4),
                source_range: Range::new(0, 4),
            }]
        );
    }

    #[test]
    fn test_append_optimized_drops_empty() {
        let rope = Rope::from("abc");
        let appended = rope.sub_sequence(0, 1).append_optimized(&[Rope::empty(), rope.sub_sequence(1, 3)]);
        assert_eq!(appended, "abc");
        assert_eq!(appended.segment_count(), 1);

        let plain = rope.append(&[Rope::empty(), Rope::from("d")]);
        assert_eq!(plain, "abcd");
        assert_eq!(plain.segment_count(), 3);
    }

    #[test]
    fn test_null_marker() {
        let null = Rope::null();
        assert!(null.is_null());
        assert!(null.is_empty());
        assert_eq!(null.to_string(), "");
    }
}
