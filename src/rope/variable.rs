//! Padded, aligned text whose layout is bound to versioned cells.
//!
//! A [`Variable`] shows some text (by default the text it replaces) between
//! a prefix and a suffix, padded out to a target width according to an
//! alignment. Width and alignment are [`Property`] cells, so connecting
//! them to a balancer's outputs makes the rope re-lay itself out whenever
//! the balancer does.

use std::rc::Rc;

use crate::version::{
    refresh, AsVersion, Clock, DependentCell, DependentVersion, Property, Serial, Shared, Version, VersionRef,
    Versioned, VolatileCell,
};

use super::{LiveText, Rope, SourceId, TrackedLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
    Justified,
}

pub struct Variable {
    replaced: Rope,
    left_pad_char: Rc<VolatileCell<char>>,
    right_pad_char: Rc<VolatileCell<char>>,
    prefix: Rc<VolatileCell<Rope>>,
    suffix: Rc<VolatileCell<Rope>>,
    chars: Rc<VolatileCell<Rope>>,
    fixed_length: Rc<DependentCell<usize>>,
    width: Rc<Property<usize>>,
    alignment: Rc<Property<TextAlignment>>,
    result: Rc<DependentCell<Rope>>,
    version: DependentVersion,
}

struct Layout {
    prefix: Rope,
    chars: Rope,
    suffix: Rope,
    fixed_length: usize,
    width: usize,
    alignment: TextAlignment,
    left_pad_char: char,
    right_pad_char: char,
}

impl Layout {
    /// Split the padding between the two sides.
    ///
    /// Centering counts the spaces already leading the prefix and trailing
    /// the suffix as part of the padding, so a cell padded around its pipes
    /// stays visually centered.
    fn padding(&self) -> (usize, usize) {
        let padding = self.width.saturating_sub(self.fixed_length);
        if padding == 0 {
            return (0, 0);
        }
        return match self.alignment {
            TextAlignment::Right => (padding, 0),
            TextAlignment::Left | TextAlignment::Justified => (0, padding),
            TextAlignment::Center => {
                let mut lead = self.prefix.count_leading(&[' ']) as isize;
                let mut trail = self.suffix.count_trailing(&[' ']) as isize;
                let common = lead.min(trail);
                trail -= common;
                lead -= common - trail;
                let even = (padding / 2) as isize;
                let left = if even > lead { (even - lead) as usize } else { 0 };
                (left, padding - left)
            }
        };
    }

    fn render(&self, clock: &Clock) -> Rope {
        let (left, right) = self.padding();
        let mut parts = Vec::with_capacity(5);
        parts.push(self.prefix.clone());
        if left > 0 {
            parts.push(Rope::repeated(self.left_pad_char, left));
        }
        parts.push(self.chars.clone());
        if right > 0 {
            parts.push(Rope::repeated(self.right_pad_char, right));
        }
        parts.push(self.suffix.clone());
        return Rope::from_segments_flat_in(clock, parts.into_iter().filter(|part| !part.is_empty()));
    }
}

impl Variable {
    /// A variable showing `replaced` itself.
    pub fn new(replaced: Rope) -> Rc<Variable> {
        return Variable::new_in(&Clock::current(), replaced);
    }

    pub fn new_in(clock: &Clock, replaced: Rope) -> Rc<Variable> {
        let chars = replaced.clone();
        return Variable::with_chars_in(clock, replaced, chars);
    }

    /// A variable showing `chars` in place of `replaced`. Locations still
    /// map to `replaced`.
    pub fn with_chars(replaced: Rope, chars: Rope) -> Rc<Variable> {
        return Variable::with_chars_in(&Clock::current(), replaced, chars);
    }

    /// Every cell of the variable lives on `clock`.
    pub fn with_chars_in(clock: &Clock, replaced: Rope, chars: Rope) -> Rc<Variable> {
        let left_pad_char = VolatileCell::new_in(clock, ' ');
        let right_pad_char = VolatileCell::new_in(clock, ' ');
        let prefix = VolatileCell::new_in(clock, Rope::empty());
        let suffix = VolatileCell::new_in(clock, Rope::empty());
        let chars = VolatileCell::new_in(clock, replaced.replaced_by(chars));

        let fixed_length = {
            let (prefix, chars, suffix) = (prefix.clone(), chars.clone(), suffix.clone());
            let deps = vec![prefix.clone().as_version(), chars.clone().as_version(), suffix.clone().as_version()];
            DependentCell::new_in(clock, deps, move || prefix.get().len() + chars.get().len() + suffix.get().len())
        };
        let width = Property::new_in(clock, "variable:width", 0);
        let alignment = Property::new_in(clock, "variable:alignment", TextAlignment::Left);

        let result = {
            let layout_cells = (
                prefix.clone(),
                chars.clone(),
                suffix.clone(),
                fixed_length.clone(),
                width.clone(),
                alignment.clone(),
                left_pad_char.clone(),
                right_pad_char.clone(),
            );
            let deps: Vec<VersionRef> = vec![
                fixed_length.clone().as_version(),
                alignment.clone().as_version(),
                width.clone().as_version(),
                left_pad_char.clone().as_version(),
                right_pad_char.clone().as_version(),
                prefix.clone().as_version(),
                chars.clone().as_version(),
                suffix.clone().as_version(),
            ];
            let render_clock = clock.clone();
            DependentCell::new_in(clock, deps, move || {
                let (prefix, chars, suffix, fixed_length, width, alignment, left, right) = &layout_cells;
                let layout = Layout {
                    prefix: prefix.get(),
                    chars: chars.get(),
                    suffix: suffix.get(),
                    fixed_length: fixed_length.get(),
                    width: width.get(),
                    alignment: alignment.get(),
                    left_pad_char: left.get(),
                    right_pad_char: right.get(),
                };
                return layout.render(&render_clock);
            })
        };
        let version = DependentVersion::new_in(clock, vec![result.clone().as_version(), replaced.version()]);

        return Rc::new(Variable {
            replaced,
            left_pad_char,
            right_pad_char,
            prefix,
            suffix,
            chars,
            fixed_length,
            width,
            alignment,
            result,
            version,
        });
    }

    /// A rope node showing this variable.
    pub fn rope(self: &Rc<Variable>) -> Rope {
        return Rope::from_variable(Rc::clone(self));
    }

    pub fn replaced(&self) -> &Rope {
        return &self.replaced;
    }

    /// The laid out content at the current cell values.
    pub fn result(&self) -> Rope {
        return self.result.get();
    }

    pub fn len(&self) -> usize {
        return self.result().len();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    fn serial(&self) -> Serial {
        refresh(&self.version);
        return self.version.version_serial();
    }

    // ===== Layout cells =====

    pub fn width(&self) -> usize {
        return self.width.get();
    }

    pub fn set_width(&self, width: usize) {
        self.write(&self.width, width);
    }

    pub fn alignment(&self) -> TextAlignment {
        return self.alignment.get();
    }

    pub fn set_alignment(&self, alignment: TextAlignment) {
        self.write(&self.alignment, alignment);
    }

    pub fn prefix(&self) -> Rope {
        return self.prefix.get();
    }

    pub fn set_prefix(&self, prefix: Rope) {
        self.prefix.set_value(prefix);
    }

    pub fn suffix(&self) -> Rope {
        return self.suffix.get();
    }

    pub fn set_suffix(&self, suffix: Rope) {
        self.suffix.set_value(suffix);
    }

    pub fn left_pad_char(&self) -> char {
        return self.left_pad_char.get();
    }

    pub fn set_left_pad_char(&self, c: char) {
        self.left_pad_char.set_value(c);
    }

    pub fn right_pad_char(&self) -> char {
        return self.right_pad_char.get();
    }

    pub fn set_right_pad_char(&self, c: char) {
        self.right_pad_char.set_value(c);
    }

    /// Set both pad chars.
    pub fn set_pad_char(&self, c: char) {
        self.left_pad_char.set_value(c);
        self.right_pad_char.set_value(c);
    }

    /// The text shown between the padding.
    pub fn variable_chars(&self) -> Rope {
        return self.chars.get();
    }

    pub fn set_variable_chars(&self, chars: Rope) {
        self.chars.set_value(self.replaced.replaced_by(chars));
    }

    pub fn left_align(&self, width: usize) {
        self.set_alignment(TextAlignment::Left);
        self.set_width(width);
    }

    pub fn right_align(&self, width: usize) {
        self.set_alignment(TextAlignment::Right);
        self.set_width(width);
    }

    pub fn center_align(&self, width: usize) {
        self.set_alignment(TextAlignment::Center);
        self.set_width(width);
    }

    /// Take the width from `cell` from now on.
    pub fn connect_width(&self, cell: Shared<usize>) {
        self.width.connect(cell);
    }

    /// Take the alignment from `cell` from now on.
    pub fn connect_alignment(&self, cell: Shared<TextAlignment>) {
        self.alignment.connect(cell);
    }

    pub fn width_property(&self) -> &Rc<Property<usize>> {
        return &self.width;
    }

    pub fn alignment_property(&self) -> &Rc<Property<TextAlignment>> {
        return &self.alignment;
    }

    /// Length of prefix, text and suffix without padding.
    pub fn fixed_length(&self) -> Shared<usize> {
        return self.fixed_length.clone();
    }

    fn write<V: Clone + PartialEq + 'static>(&self, property: &Property<V>, value: V) {
        if let Err(error) = property.set(value) {
            log::warn!("variable layout write ignored: {error}");
        }
    }

    // ===== Tracking =====

    pub fn tracked_source_location(&self, index: usize) -> TrackedLocation {
        return self.result().tracked_source_location(index);
    }

    pub fn tracked_location(&self, source: Option<SourceId>, offset: usize) -> Option<TrackedLocation> {
        return self.result().tracked_location(source, offset);
    }
}

impl LiveText for Variable {
    fn text(&self) -> Rope {
        return self.result();
    }

    fn text_serial(&self) -> Serial {
        return self.serial();
    }

    fn into_version(self: Rc<Self>) -> VersionRef {
        return self;
    }
}

impl Version for Variable {
    fn version_serial(&self) -> Serial {
        return self.serial();
    }

    fn is_stale(&self) -> bool {
        return self.version.is_stale();
    }

    fn is_mutable(&self) -> bool {
        return true;
    }

    fn dependencies(&self) -> Vec<VersionRef> {
        return self.version.dependencies();
    }

    fn next_version(&self) {
        self.version.next_version();
    }
}
