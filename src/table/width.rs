//! Char width providers for column balancing.
//!
//! Widths are abstract units. A provider also names the width of one space,
//! the unit padding is added in, so the balancer can round column widths to
//! whole spaces.

use rustc_hash::FxHashMap;
use unicode_width::UnicodeWidthChar;

use crate::rope::Rope;

pub trait CharWidthProvider {
    fn space_width(&self) -> usize;

    fn char_width(&self, c: char) -> usize;

    fn chars_width(&self, chars: &[char]) -> usize {
        return chars.iter().map(|&c| self.char_width(c)).sum();
    }

    fn rope_width(&self, rope: &Rope) -> usize {
        return rope.with_chars(|chars| self.chars_width(chars));
    }
}

/// Every char is one unit wide.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnityWidth;

impl CharWidthProvider for UnityWidth {
    fn space_width(&self) -> usize {
        return 1;
    }

    fn char_width(&self, _c: char) -> usize {
        return 1;
    }

    fn chars_width(&self, chars: &[char]) -> usize {
        return chars.len();
    }
}

/// Terminal column widths: wide CJK chars take two columns, combining
/// marks and control chars none.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeWidth;

impl CharWidthProvider for UnicodeWidth {
    fn space_width(&self) -> usize {
        return 1;
    }

    fn char_width(&self, c: char) -> usize {
        return UnicodeWidthChar::width(c).unwrap_or(0);
    }
}

/// Proportional font metrics: explicit widths per char, a default for the
/// rest.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    space: usize,
    default: usize,
    widths: FxHashMap<char, usize>,
}

impl FontMetrics {
    pub fn new(space: usize, default: usize) -> FontMetrics {
        let mut widths = FxHashMap::default();
        widths.insert(' ', space.max(1));
        return FontMetrics {
            space: space.max(1),
            default,
            widths,
        };
    }

    pub fn with_width(mut self, c: char, width: usize) -> FontMetrics {
        self.widths.insert(c, width);
        if c == ' ' {
            self.space = width.max(1);
        }
        return self;
    }
}

impl CharWidthProvider for FontMetrics {
    fn space_width(&self) -> usize {
        return self.space;
    }

    fn char_width(&self, c: char) -> usize {
        return self.widths.get(&c).copied().unwrap_or(self.default);
    }
}
