//! Blocks of lines cut from a larger text.
//!
//! A [`TextBlock`] holds its text one rope per line, each still backed by
//! the original source, so a nested block (say the body of a quote with
//! its `> ` markers stripped) can always report where its chars came from.

use super::{Rope, SourceId};

#[derive(Clone, Debug)]
pub struct TextBlock {
    /// Every line with its trailing `\n`, except possibly the last.
    lines: Vec<Rope>,
    contents: Rope,
}

impl TextBlock {
    /// Split `text` into lines, expanding tabs first when `tab_size` is
    /// above 0.
    pub fn new(text: &Rope, tab_size: usize) -> TextBlock {
        let text = if tab_size > 0 { text.expand_tabs(tab_size) } else { text.clone() };
        return TextBlock::from_lines(text.split_parts('\n', true));
    }

    fn from_lines(lines: Vec<Rope>) -> TextBlock {
        let contents = Rope::from_segments(lines.iter().cloned());
        return TextBlock { lines, contents };
    }

    pub fn lines(&self) -> &[Rope] {
        return &self.lines;
    }

    pub fn line_count(&self) -> usize {
        return self.lines.len();
    }

    pub fn contents(&self) -> &Rope {
        return &self.contents;
    }

    pub fn len(&self) -> usize {
        return self.contents.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.contents.is_empty();
    }

    /// The lines within `[start, end)` of this block.
    pub fn child_block(&self, start: usize, end: usize) -> TextBlock {
        return self.child_block_with(start, end, |line| line);
    }

    /// Like [`TextBlock::child_block`], with `prefix` removed from every
    /// line that starts with it.
    pub fn child_block_stripped(&self, start: usize, end: usize, prefix: &str) -> TextBlock {
        let prefix: Vec<char> = prefix.chars().collect();
        if prefix.is_empty() {
            return self.child_block(start, end);
        }
        return self.child_block_with(start, end, |line| {
            let stripped = line.with_chars(|chars| chars.starts_with(&prefix));
            if stripped {
                return line.sub_sequence(prefix.len(), line.len());
            }
            return line;
        });
    }

    /// The lines within `[start, end)`, each passed through `map`.
    pub fn child_block_with(&self, start: usize, end: usize, map: impl FnMut(Rope) -> Rope) -> TextBlock {
        let lines = if start == 0 && end == self.len() {
            self.lines.clone()
        } else {
            self.contents.sub_sequence(start, end).split_parts('\n', true)
        };
        return TextBlock::from_lines(lines.into_iter().map(map).collect());
    }

    /// Source offset of the char at `index`.
    pub fn offset(&self, index: usize) -> usize {
        return self.contents.tracked_source_location(index).offset;
    }

    /// Index in this block of `offset` in `source`, if the block shows it.
    pub fn index(&self, source: Option<SourceId>, offset: usize) -> Option<usize> {
        return self.contents.tracked_location(source, offset).map(|location| location.index);
    }
}
