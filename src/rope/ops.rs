//! Text operations over ropes that build on the core node set.

use regex_automata::meta::Regex;
use regex_automata::{Anchored, Input};

use super::Rope;
use crate::error::{Error, Result};

/// Chars `trim` removes by default.
pub(crate) const WHITESPACE: &[char] = &[' ', '\t', '\n'];

impl Rope {
    // ===== Whitespace =====

    pub fn count_leading(&self, chars: &[char]) -> usize {
        return self.with_chars(|text| text.iter().take_while(|c| chars.contains(c)).count());
    }

    pub fn count_trailing(&self, chars: &[char]) -> usize {
        return self.with_chars(|text| text.iter().rev().take_while(|c| chars.contains(c)).count());
    }

    pub fn trim_chars(&self, chars: &[char]) -> Rope {
        let leading = self.count_leading(chars);
        if leading == self.len() {
            return self.sub_sequence(0, 0);
        }
        let trailing = self.count_trailing(chars);
        return self.sub_sequence(leading, self.len() - trailing);
    }

    pub fn trim(&self) -> Rope {
        return self.trim_chars(WHITESPACE);
    }

    pub fn trim_start(&self) -> Rope {
        let leading = self.count_leading(WHITESPACE);
        return self.sub_sequence(leading, self.len());
    }

    pub fn trim_end(&self) -> Rope {
        let trailing = self.count_trailing(WHITESPACE);
        return self.sub_sequence(0, self.len() - trailing);
    }

    /// True for an empty rope or one holding only whitespace.
    pub fn is_blank(&self) -> bool {
        return self.count_leading(WHITESPACE) == self.len();
    }

    /// This rope `count` times over, sharing the same node.
    pub fn repeat(&self, count: usize) -> Rope {
        return match count {
            0 => Rope::empty(),
            1 => self.clone(),
            _ => Rope::from_segments(std::iter::repeat_n(self.clone(), count)),
        };
    }

    /// Flattened copy of this rope as one segmented node.
    pub fn segmented_flat(&self) -> Rope {
        return Rope::from_segments_flat([self.clone()]);
    }

    // ===== Splitting =====

    /// Parts ending at each `delim`, which stays on its part when
    /// `include_delim` is set. Text after the last delimiter becomes a final
    /// part when non-empty.
    pub fn split_parts(&self, delim: char, include_delim: bool) -> Vec<Rope> {
        let mut parts = Vec::new();
        let mut start = 0;
        let ends: Vec<usize> = self.with_chars(|text| {
            text.iter()
                .enumerate()
                .filter(|(_, c)| **c == delim)
                .map(|(i, _)| i)
                .collect()
        });
        for at in ends {
            let end = if include_delim { at + 1 } else { at };
            parts.push(self.sub_sequence(start, end));
            start = at + 1;
        }
        if start < self.len() {
            parts.push(self.sub_sequence(start, self.len()));
        }
        return parts;
    }

    pub fn split_parts_segmented(&self, delim: char, include_delim: bool) -> Rope {
        return Rope::from_segments_flat(self.split_parts(delim, include_delim));
    }

    // ===== Regex =====

    /// Match `pattern` against the whole rope.
    ///
    /// Returns `None` when it does not match. Otherwise entry 0 is the whole
    /// rope and entry `i` is group `i` as a sub-sequence, or the null marker
    /// when the group took no part in the match or matched nothing.
    pub fn extract_groups(&self, pattern: &str) -> Result<Option<Vec<Rope>>> {
        let regex = Regex::new(&format!("(?:{pattern})\\z"))
            .map_err(|error| Error::InvalidPattern(format!("{pattern}: {error}")))?;
        let text: String = self.with_chars(|chars| chars.iter().collect());

        // Byte offset -> char index, defined at char boundaries.
        let mut char_index = vec![0; text.len() + 1];
        for (index, (byte, _)) in text.char_indices().enumerate() {
            char_index[byte] = index;
        }
        char_index[text.len()] = self.len();

        let mut captures = regex.create_captures();
        regex.search_captures(&Input::new(&text).anchored(Anchored::Yes), &mut captures);
        if !captures.is_match() {
            return Ok(None);
        }

        let groups = (0..captures.group_len())
            .map(|group| match captures.get_group(group) {
                Some(span) if !span.is_empty() => {
                    self.sub_sequence(char_index[span.start], char_index[span.end])
                }
                _ => Rope::null(),
            })
            .collect();
        return Ok(Some(groups));
    }

    /// The matched groups after the whole match as one segmented rope,
    /// skipping null markers.
    pub fn extract_groups_segmented(&self, pattern: &str) -> Result<Option<Rope>> {
        let Some(groups) = self.extract_groups(pattern)? else {
            return Ok(None);
        };
        let parts = groups.into_iter().skip(1).filter(|group| !group.is_null());
        return Ok(Some(Rope::from_segments_flat(parts)));
    }

    // ===== Tabs =====

    /// Each tab shown as spaces up to the next multiple of `tab_size`.
    /// Locations inside the spaces map back to the tab.
    pub fn expand_tabs(&self, tab_size: usize) -> Rope {
        let tab_size = tab_size.max(1);
        let tabs = self.with_chars(|text| text.contains(&'\t'));
        if !tabs {
            return self.clone();
        }

        let mut parts = Vec::new();
        let mut column = 0;
        let mut start = 0;
        let text = self.to_chars();
        for (index, c) in text.iter().enumerate() {
            match c {
                '\t' => {
                    if start < index {
                        parts.push(self.sub_sequence(start, index));
                    }
                    let spaces = tab_size - column % tab_size;
                    let tab = self.sub_sequence(index, index + 1);
                    parts.push(tab.replaced_by(Rope::repeated(' ', spaces)));
                    column += spaces;
                    start = index + 1;
                }
                '\n' => column = 0,
                _ => column += 1,
            }
        }
        if start < text.len() {
            parts.push(self.sub_sequence(start, text.len()));
        }
        return Rope::from_segments(parts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim() {
        let rope = Rope::from("  a b \t\n");
        assert_eq!(rope.trim(), "a b");
        assert_eq!(rope.trim_start(), "a b \t\n");
        assert_eq!(rope.trim_end(), "  a b");
        assert_eq!(rope.count_leading(&[' ']), 2);
        assert_eq!(rope.count_trailing(&[' ']), 0);
        assert_eq!(Rope::from("   ").trim(), "");
        assert!(Rope::from(" \t").is_blank());
        assert!(!rope.is_blank());
    }

    #[test]
    fn test_trim_keeps_tracking() {
        let rope = Rope::from("  ab ");
        let trimmed = rope.trim();
        assert_eq!(trimmed.tracked_source_location(0).offset, 2);
    }

    #[test]
    fn test_repeat() {
        assert_eq!(Rope::from("ab").repeat(3), "ababab");
        assert_eq!(Rope::from("ab").repeat(0), "");
    }

    #[test]
    fn test_split_parts() {
        let rope = Rope::from("a|b||c");
        let parts = rope.split_parts('|', false);
        assert_eq!(parts, vec![Rope::from("a"), Rope::from("b"), Rope::from(""), Rope::from("c")]);

        let parts = rope.split_parts('|', true);
        assert_eq!(parts, vec![Rope::from("a|"), Rope::from("b|"), Rope::from("|"), Rope::from("c")]);

        let parts = Rope::from("a|").split_parts('|', false);
        assert_eq!(parts, vec![Rope::from("a")]);

        let joined = rope.split_parts_segmented('|', true);
        assert_eq!(joined, "a|b||c");
        assert_eq!(joined.tracked_source_location(5).offset, 5);
    }

    #[test]
    fn test_extract_groups() {
        let rope = Rope::from("key = value");
        let groups = rope.extract_groups(r"(\w+)\s*=\s*(\w+)(;)?").unwrap().unwrap();
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0], "key = value");
        assert_eq!(groups[1], "key");
        assert_eq!(groups[2], "value");
        assert!(groups[3].is_null());
        assert_eq!(groups[2].tracked_source_location(0).offset, 6);
    }

    #[test]
    fn test_extract_groups_requires_full_match() {
        let rope = Rope::from("key = value!");
        assert!(rope.extract_groups(r"(\w+)\s*=\s*(\w+)").unwrap().is_none());
        assert!(matches!(rope.extract_groups("(unclosed"), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_extract_groups_multibyte() {
        let rope = Rope::from("äb:çd");
        let groups = rope.extract_groups("(.+):(.+)").unwrap().unwrap();
        assert_eq!(groups[1], "äb");
        assert_eq!(groups[2], "çd");
        let joined = rope.extract_groups_segmented("(.+):(.+)").unwrap().unwrap();
        assert_eq!(joined, "äbçd");
    }

    #[test]
    fn test_expand_tabs() {
        let rope = Rope::from("a\tb\n\tc");
        let expanded = rope.expand_tabs(4);
        assert_eq!(expanded, "a   b\n    c");
        // Every space of the tab maps back to the tab itself.
        assert_eq!(expanded.tracked_source_location(2).offset, 1);
        assert_eq!(expanded.tracked_source_location(4).offset, 2);
        assert_eq!(expanded.tracked_source_location(10).offset, 5);

        let plain = Rope::from("abc");
        assert!(plain.expand_tabs(4).ptr_eq(&plain));
    }
}
