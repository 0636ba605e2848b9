//! Word wrapped paragraphs.
//!
//! A [`Paragraph`] reflows the text it replaces into lines of a target
//! width, with separate indents for the first line and the rest, and aligns
//! every line left, right, centered or justified. Like [`Variable`] its
//! layout settings are [`Property`] cells, so the rope re-wraps itself when
//! they change, and every word in the result still tracks back to the
//! input.
//!
//! [`Variable`]: super::Variable

use std::rc::Rc;

use crate::version::{
    refresh, AsVersion, Clock, DependentCell, DependentVersion, Property, Serial, Shared, Version, VersionRef,
    Versioned,
};

use super::{LiveText, Range, Rope, SourceId, TextAlignment, TrackedLocation};

/// Forces a line break unless the line is still empty. The char itself is
/// never part of the output.
pub const START_LINE: char = '\u{2028}';

// =============================================================================
// Tokens
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Space,
    /// A newline.
    Break,
    /// Two or more spaces followed by a newline, spaces included.
    HardBreak,
    StartLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: Range,
}

fn is_blank(c: char) -> bool {
    return matches!(c, ' ' | '\t' | '\n' | START_LINE);
}

/// Splits text into words, whitespace runs and breaks. Whitespace before a
/// newline belongs to the break.
pub struct Tokens<'a> {
    chars: &'a [char],
    index: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(chars: &'a [char]) -> Tokens<'a> {
        return Tokens { chars, index: 0 };
    }

    fn emit(&mut self, kind: TokenKind, start: usize, end: usize, resume: usize) -> Option<Token> {
        self.index = resume;
        return Some(Token {
            kind,
            range: Range::new(start, end),
        });
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let chars = self.chars;
        let start = self.index;
        if start >= chars.len() {
            return None;
        }

        if !is_blank(chars[start]) {
            let end = chars[start..]
                .iter()
                .position(|&c| is_blank(c))
                .map_or(chars.len(), |len| start + len);
            return self.emit(TokenKind::Word, start, end, end);
        }

        let mut index = start;
        let mut spaces = 0;
        while index < chars.len() {
            match chars[index] {
                '\n' if spaces >= 2 => return self.emit(TokenKind::HardBreak, index - spaces, index + 1, index + 1),
                '\n' => return self.emit(TokenKind::Break, index, index + 1, index + 1),
                START_LINE => return self.emit(TokenKind::StartLine, index, index + 1, index + 1),
                ' ' => spaces += 1,
                '\t' => spaces = 0,
                _ => break,
            }
            index += 1;
        }
        return self.emit(TokenKind::Space, start, index, index);
    }
}

// =============================================================================
// Layout
// =============================================================================

struct Word {
    /// The whitespace in the input before this word, if any.
    gap: Option<Range>,
    range: Range,
}

/// A snapshot of the paragraph settings, applied to one text.
struct Layout {
    first_indent: usize,
    indent: usize,
    first_width: usize,
    width: usize,
    alignment: TextAlignment,
    keep_hard_breaks: bool,
    keep_line_breaks: bool,
}

/// Lines built so far and the words of the open one.
struct Wrapper<'a> {
    layout: &'a Layout,
    text: &'a Rope,
    parts: Vec<Rope>,
    words: Vec<Word>,
    /// Words and single spaces on the open line.
    used: usize,
    /// Whitespace seen since the last word of the open line.
    pending: Option<Range>,
    line: usize,
}

impl Wrapper<'_> {
    fn line_indent(&self) -> usize {
        return if self.line == 0 { self.layout.first_indent } else { self.layout.indent };
    }

    fn line_width(&self) -> usize {
        return if self.line == 0 { self.layout.first_width } else { self.layout.width };
    }

    fn source(&self, range: Range) -> Rope {
        return self.text.sub_sequence(range.start, range.end);
    }

    /// Add `range` to the open line, or report that it does not fit.
    fn push_word(&mut self, range: Range) -> bool {
        if self.words.is_empty() {
            self.pending = None;
            self.used = range.len();
            self.words.push(Word { gap: None, range });
            return true;
        }
        if self.line_indent() + self.used + range.len() + 1 > self.line_width() {
            return false;
        }
        self.used += range.len() + 1;
        let gap = self.pending.take();
        self.words.push(Word { gap, range });
        return true;
    }

    /// Close the open line and follow it with `line_break`.
    fn end_line(&mut self, last: bool, line_break: Rope) {
        self.flush_line(last);
        self.parts.push(line_break);
    }

    fn flush_line(&mut self, last: bool) {
        let indent = self.line_indent();
        let extra = self.line_width().saturating_sub(indent + self.used);
        let gaps = self.words.len().saturating_sub(1);

        let (lead, add, mut remainder) = match self.layout.alignment {
            TextAlignment::Left => (indent, 0, 0),
            TextAlignment::Right => (indent + extra, 0, 0),
            TextAlignment::Center => (indent + extra / 2, 0, 0),
            TextAlignment::Justified if !last && gaps > 0 => (indent, extra / gaps, extra % gaps),
            TextAlignment::Justified => (indent, 0, 0),
        };
        if lead > 0 {
            self.parts.push(Rope::repeated(' ', lead));
        }

        let words = std::mem::take(&mut self.words);
        for (index, word) in words.iter().enumerate() {
            if index > 0 {
                let count = 1 + add + usize::from(remainder > 0);
                remainder = remainder.saturating_sub(1);
                self.parts.push(self.gap(word.gap, count));
            }
            self.parts.push(self.source(word.range));
        }

        self.used = 0;
        self.pending = None;
        self.line += 1;
    }

    /// `count` spaces standing in for the input whitespace at `gap`.
    fn gap(&self, gap: Option<Range>, count: usize) -> Rope {
        let Some(range) = gap else {
            return Rope::repeated(' ', count);
        };
        let source = self.source(range);
        if range.len() == count && source.chars().all(|c| c == ' ') {
            return source;
        }
        return source.replaced_by(Rope::repeated(' ', count));
    }
}

impl Layout {
    fn render(&self, text: &Rope, clock: &Clock) -> Rope {
        if self.first_width == 0 {
            return text.clone();
        }

        let chars = text.to_chars();
        let mut wrapper = Wrapper {
            layout: self,
            text,
            parts: Vec::new(),
            words: Vec::new(),
            used: 0,
            pending: None,
            line: 0,
        };

        for token in Tokens::new(&chars) {
            let open = !wrapper.words.is_empty();
            match token.kind {
                TokenKind::Word => {
                    if !wrapper.push_word(token.range) {
                        let line_break = match wrapper.pending {
                            Some(range) => wrapper.source(range).replaced_by(Rope::from("\n")),
                            None => Rope::from("\n"),
                        };
                        wrapper.end_line(false, line_break);
                        wrapper.push_word(token.range);
                    }
                }
                TokenKind::Space => {
                    if open {
                        wrapper.pending = Some(token.range);
                    }
                }
                TokenKind::HardBreak if open && self.keep_hard_breaks => {
                    let line_break = wrapper.source(token.range).replaced_by(Rope::from("  \n"));
                    wrapper.end_line(true, line_break);
                }
                TokenKind::HardBreak if open && self.keep_line_breaks => {
                    let line_break = wrapper.source(token.range).replaced_by(Rope::from("\n"));
                    wrapper.end_line(true, line_break);
                }
                TokenKind::Break if open && self.keep_line_breaks => {
                    let line_break = wrapper.source(token.range);
                    wrapper.end_line(true, line_break);
                }
                TokenKind::HardBreak | TokenKind::Break => {
                    if open {
                        wrapper.pending = Some(token.range);
                    }
                }
                TokenKind::StartLine => {
                    if open {
                        let line_break = wrapper.source(token.range).replaced_by(Rope::from("\n"));
                        wrapper.end_line(false, line_break);
                    }
                }
            }
        }
        if !wrapper.words.is_empty() {
            wrapper.flush_line(true);
        }
        return Rope::from_segments_in(clock, Rope::splice_sequences(wrapper.parts));
    }
}

// =============================================================================
// Paragraph
// =============================================================================

pub struct Paragraph {
    replaced: Rope,
    first_indent: Rc<Property<usize>>,
    indent: Rc<Property<usize>>,
    first_width_offset: Rc<Property<isize>>,
    width: Rc<Property<usize>>,
    alignment: Rc<Property<TextAlignment>>,
    keep_hard_breaks: Rc<Property<bool>>,
    keep_line_breaks: Rc<Property<bool>>,
    result: Rc<DependentCell<Rope>>,
    version: DependentVersion,
}

/// Width of the first line: `width` moved by `offset`, or 0 for no wrapping.
fn first_width(width: usize, offset: isize) -> usize {
    if width == 0 {
        return 0;
    }
    return width.saturating_add_signed(offset);
}

impl Paragraph {
    /// A paragraph showing `replaced` unchanged until a width is set.
    pub fn new(replaced: Rope) -> Rc<Paragraph> {
        return Paragraph::new_in(&Clock::current(), replaced);
    }

    pub fn new_in(clock: &Clock, replaced: Rope) -> Rc<Paragraph> {
        let first_indent = Property::new_in(clock, "paragraph:first-indent", 0);
        let indent = Property::new_in(clock, "paragraph:indent", 0);
        let first_width_offset = Property::new_in(clock, "paragraph:first-width-offset", 0);
        let width = Property::new_in(clock, "paragraph:width", 0);
        let alignment = Property::new_in(clock, "paragraph:alignment", TextAlignment::Left);
        let keep_hard_breaks = Property::new_in(clock, "paragraph:keep-hard-breaks", true);
        let keep_line_breaks = Property::new_in(clock, "paragraph:keep-line-breaks", false);

        let result = {
            let deps: Vec<VersionRef> = vec![
                first_indent.clone().as_version(),
                indent.clone().as_version(),
                first_width_offset.clone().as_version(),
                width.clone().as_version(),
                alignment.clone().as_version(),
                keep_hard_breaks.clone().as_version(),
                keep_line_breaks.clone().as_version(),
                replaced.version(),
            ];
            let cells = (
                first_indent.clone(),
                indent.clone(),
                first_width_offset.clone(),
                width.clone(),
                alignment.clone(),
                keep_hard_breaks.clone(),
                keep_line_breaks.clone(),
            );
            let text = replaced.clone();
            let render_clock = clock.clone();
            DependentCell::new_in(clock, deps, move || {
                let (first_indent, indent, offset, width, alignment, keep_hard_breaks, keep_line_breaks) = &cells;
                let width = width.get();
                let layout = Layout {
                    first_indent: first_indent.get(),
                    indent: indent.get(),
                    first_width: first_width(width, offset.get()),
                    width,
                    alignment: alignment.get(),
                    keep_hard_breaks: keep_hard_breaks.get(),
                    keep_line_breaks: keep_line_breaks.get(),
                };
                return layout.render(&text, &render_clock);
            })
        };
        let version = DependentVersion::new_in(clock, vec![result.clone().as_version(), replaced.version()]);

        return Rc::new(Paragraph {
            replaced,
            first_indent,
            indent,
            first_width_offset,
            width,
            alignment,
            keep_hard_breaks,
            keep_line_breaks,
            result,
            version,
        });
    }

    /// A rope node showing this paragraph.
    pub fn rope(self: &Rc<Paragraph>) -> Rope {
        return Rope::from_live(Rc::clone(self) as Rc<dyn LiveText>);
    }

    pub fn replaced(&self) -> &Rope {
        return &self.replaced;
    }

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

    // ===== Settings =====

    /// 0 leaves the text unwrapped.
    pub fn width(&self) -> usize {
        return self.width.get();
    }

    pub fn set_width(&self, width: usize) {
        write(&self.width, width);
    }

    pub fn first_width(&self) -> usize {
        return first_width(self.width.get(), self.first_width_offset.get());
    }

    pub fn first_width_offset(&self) -> isize {
        return self.first_width_offset.get();
    }

    /// Make the first line `offset` wider than the rest.
    pub fn set_first_width_offset(&self, offset: isize) {
        write(&self.first_width_offset, offset);
    }

    pub fn indent(&self) -> usize {
        return self.indent.get();
    }

    pub fn set_indent(&self, indent: usize) {
        write(&self.indent, indent);
    }

    pub fn first_indent(&self) -> usize {
        return self.first_indent.get();
    }

    pub fn set_first_indent(&self, indent: usize) {
        write(&self.first_indent, indent);
    }

    pub fn alignment(&self) -> TextAlignment {
        return self.alignment.get();
    }

    pub fn set_alignment(&self, alignment: TextAlignment) {
        write(&self.alignment, alignment);
    }

    pub fn keep_hard_breaks(&self) -> bool {
        return self.keep_hard_breaks.get();
    }

    /// Keep lines ending in two spaces as lines, written as `"  \n"`.
    pub fn set_keep_hard_breaks(&self, keep: bool) {
        write(&self.keep_hard_breaks, keep);
    }

    pub fn keep_line_breaks(&self) -> bool {
        return self.keep_line_breaks.get();
    }

    pub fn set_keep_line_breaks(&self, keep: bool) {
        write(&self.keep_line_breaks, keep);
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

    pub fn justify_align(&self, width: usize) {
        self.set_alignment(TextAlignment::Justified);
        self.set_width(width);
    }

    pub fn connect_width(&self, cell: Shared<usize>) {
        self.width.connect(cell);
    }

    pub fn connect_alignment(&self, cell: Shared<TextAlignment>) {
        self.alignment.connect(cell);
    }

    // ===== Tracking =====

    pub fn tracked_source_location(&self, index: usize) -> TrackedLocation {
        return self.result().tracked_source_location(index);
    }

    pub fn tracked_location(&self, source: Option<SourceId>, offset: usize) -> Option<TrackedLocation> {
        return self.result().tracked_location(source, offset);
    }
}

fn write<V: Clone + PartialEq + 'static>(property: &Property<V>, value: V) {
    if let Err(error) = property.set(value) {
        log::warn!("paragraph setting {} ignored: {error}", property.name());
    }
}

impl LiveText for Paragraph {
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

impl Version for Paragraph {
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

#[cfg(test)]
mod tests {
    use super::*;

    const LOREM: &str = "Lorem ipsum dolor sit amet, consectetaur adipisicing elit, sed do eiusmod tempor incididunt ut \
                         labore et dolore magna aliqua. Ut enim ad minim veniam, quis nostrud exercitation ullamco \
                         laboris nisi ut aliquip ex ea commodo consequat.";

    fn tokens(text: &str) -> Vec<(TokenKind, usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        return Tokens::new(&chars)
            .map(|token| (token.kind, token.range.start, token.range.end))
            .collect();
    }

    #[test]
    fn test_tokens() {
        use TokenKind::*;
        assert_eq!(tokens("ab  \nc"), vec![(Word, 0, 2), (HardBreak, 2, 5), (Word, 5, 6)]);
        assert_eq!(tokens("a \tb"), vec![(Word, 0, 1), (Space, 1, 3), (Word, 3, 4)]);
        assert_eq!(tokens("a \n b"), vec![(Word, 0, 1), (Break, 2, 3), (Space, 3, 4), (Word, 4, 5)]);
        assert_eq!(tokens("a\u{2028}b "), vec![(Word, 0, 1), (StartLine, 1, 2), (Word, 2, 3), (Space, 3, 4)]);
    }

    #[test]
    fn test_no_width_keeps_text() {
        let paragraph = Paragraph::new(Rope::from("one  two\nthree"));
        assert_eq!(paragraph.result(), "one  two\nthree");
    }

    #[test]
    fn test_alignments() {
        let paragraph = Paragraph::new(Rope::from("Lorem ipsum dolor sit amet"));
        let rope = paragraph.rope();
        paragraph.left_align(11);
        assert_eq!(rope, "Lorem ipsum\ndolor sit\namet");
        paragraph.right_align(11);
        assert_eq!(rope, "Lorem ipsum\n  dolor sit\n       amet");
        paragraph.center_align(11);
        assert_eq!(rope, "Lorem ipsum\n dolor sit\n   amet");
        paragraph.justify_align(11);
        assert_eq!(rope, "Lorem ipsum\ndolor   sit\namet");
    }

    #[test]
    fn test_indents() {
        let paragraph = Paragraph::new(Rope::from("  Lorem ipsum\n dolor sit amet"));
        paragraph.set_first_indent(2);
        paragraph.set_indent(4);
        paragraph.left_align(14);
        assert_eq!(paragraph.result(), "  Lorem ipsum\n    dolor sit\n    amet");

        paragraph.set_first_width_offset(-4);
        assert_eq!(paragraph.first_width(), 10);
        assert_eq!(paragraph.result(), "  Lorem\n    ipsum\n    dolor sit\n    amet");
    }

    #[test]
    fn test_breaks() {
        let paragraph = Paragraph::new(Rope::from("one two  \nthree\nfour"));
        paragraph.left_align(40);
        assert_eq!(paragraph.result(), "one two  \nthree four");

        paragraph.set_keep_hard_breaks(false);
        assert_eq!(paragraph.result(), "one two three four");

        paragraph.set_keep_line_breaks(true);
        assert_eq!(paragraph.result(), "one two\nthree\nfour");

        let forced = Paragraph::new(Rope::from("one\u{2028}two \u{2028}\u{2028}three"));
        forced.left_align(40);
        assert_eq!(forced.result(), "one\ntwo\nthree");
    }

    #[test]
    fn test_words_track_their_source() {
        let source = Rope::from("Lorem ipsum dolor");
        let paragraph = Paragraph::new(source.clone());
        paragraph.justify_align(11);
        let rope = paragraph.rope();
        assert_eq!(rope, "Lorem ipsum\ndolor");
        assert_eq!(rope.tracked_source_location(6).offset, 6);
        assert_eq!(rope.tracked_source_location(12).offset, 12);
        let found = rope.tracked_location(source.source_id(), 14).unwrap();
        assert_eq!(rope.char_at(found.index), 'l');
    }

    #[test]
    fn test_width_change_rewraps() {
        let paragraph = Paragraph::new(Rope::from("aa bb cc"));
        let rope = paragraph.rope();
        paragraph.left_align(5);
        let before = rope.version().version_serial();
        assert_eq!(rope, "aa bb\ncc");

        paragraph.set_width(8);
        assert_eq!(rope, "aa bb cc");
        assert!(rope.version().version_serial() > before);
    }

    /// Every line keeps its indent, fits the width and is padded the way
    /// its alignment asks.
    #[test]
    fn test_lines_fit_every_layout() {
        let alignments = [
            TextAlignment::Left,
            TextAlignment::Center,
            TextAlignment::Right,
            TextAlignment::Justified,
        ];
        let paragraph = Paragraph::new(Rope::from(LOREM));
        for alignment in alignments {
            paragraph.set_alignment(alignment);
            for indent in [0, 4] {
                paragraph.set_indent(indent);
                for first_indent in [0, 4, 8] {
                    paragraph.set_first_indent(first_indent);
                    for width in (10..=50).step_by(10) {
                        paragraph.set_width(width);
                        let text = paragraph.result().to_string();
                        let lines: Vec<&str> = text.split('\n').collect();
                        for (index, line) in lines.iter().enumerate() {
                            let indent = if index == 0 { first_indent } else { indent };
                            let trimmed = line.trim();
                            let lead = line.len() - line.trim_start().len();
                            let room = width.saturating_sub(indent);
                            let context = format!("{alignment:?} {width} line {index}: {line:?}");
                            if trimmed.contains(' ') {
                                assert!(trimmed.len() <= room, "{context}");
                            }
                            if trimmed.len() > room {
                                assert_eq!(lead, indent, "{context}");
                                continue;
                            }
                            let padding = room - trimmed.len();
                            let last = index + 1 == lines.len();
                            match alignment {
                                TextAlignment::Left => assert_eq!(lead, indent, "{context}"),
                                TextAlignment::Right => assert_eq!(lead, indent + padding, "{context}"),
                                TextAlignment::Center => assert_eq!(lead, indent + padding / 2, "{context}"),
                                TextAlignment::Justified if last || !trimmed.contains(' ') => {
                                    assert_eq!(lead, indent, "{context}")
                                }
                                TextAlignment::Justified => assert_eq!(line.len(), width, "{context}"),
                            }
                        }
                    }
                }
            }
        }
    }
}
