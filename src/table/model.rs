//! Parsed pipe tables and their structural editing.
//!
//! Cells keep their text as sub-sequences of the parsed rope, so whatever
//! is built from them still tracks back to the input.

use log::debug;

use crate::rope::Rope;

/// The `:` markers of a separator cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparatorMarkers {
    pub left: bool,
    pub right: bool,
}

/// Markers of `text` if it reads `\s*:?-+:?\s*`.
pub fn separator_markers(text: &Rope) -> Option<SeparatorMarkers> {
    let text = text.trim();
    return text.with_chars(|chars| {
        let left = chars.first() == Some(&':');
        let rest = if left { &chars[1..] } else { chars };
        let right = rest.last() == Some(&':');
        let dashes = if right { &rest[..rest.len() - 1] } else { rest };
        if dashes.is_empty() || dashes.iter().any(|&c| c != '-') {
            return None;
        }
        return Some(SeparatorMarkers { left, right });
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCell {
    /// Trimmed content.
    pub text: Rope,
    /// Width of the cell text as written, whitespace included.
    pub untrimmed_width: usize,
    pub span: usize,
}

impl TableCell {
    pub fn new(raw: Rope, span: usize) -> TableCell {
        return TableCell {
            text: raw.trim(),
            untrimmed_width: raw.len(),
            span: span.max(1),
        };
    }

    pub fn empty() -> TableCell {
        return TableCell::new(Rope::empty(), 1);
    }

    pub fn separator() -> TableCell {
        return TableCell::new(Rope::from("---"), 1);
    }

    fn with_span(&self, span: usize) -> TableCell {
        return TableCell { span, ..self.clone() };
    }
}

// =============================================================================
// TableRow
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
    pub is_separator: bool,
}

impl TableRow {
    pub fn new(cells: Vec<TableCell>) -> TableRow {
        let is_separator = !cells.is_empty() && cells.iter().all(|cell| separator_markers(&cell.text).is_some());
        return TableRow { cells, is_separator };
    }

    /// Split one table line into cells. A cell followed by k empty
    /// segments spans k + 1 columns.
    pub fn parse(line: &Rope) -> TableRow {
        let mut row = line.clone();
        if row.get(0) == Some('|') {
            row = row.sub_sequence(1, row.len());
        }
        let len = row.len();
        if len > 2 && row.char_at(len - 1) == '|' && row.char_at(len - 2) != '|' {
            row = row.sub_sequence(0, len - 1);
        }

        let segments = row.split_parts('|', false);
        let mut cells = Vec::new();
        let mut index = 0;
        while index < segments.len() {
            let mut span = 1;
            while index + span < segments.len() && segments[index + span].is_empty() {
                span += 1;
            }
            cells.push(TableCell::new(segments[index].clone(), span));
            index += span;
        }
        return TableRow::new(cells);
    }

    pub fn total_columns(&self) -> usize {
        return self.column_of(self.cells.len());
    }

    /// The first column of the cell at `index`.
    pub fn column_of(&self, index: usize) -> usize {
        return self.cells.iter().take(index).map(|cell| cell.span).sum();
    }

    /// The index of the first cell starting at or after `column`.
    pub fn index_of(&self, column: usize) -> usize {
        let mut columns = 0;
        let mut index = 0;
        for cell in &self.cells {
            if columns >= column {
                break;
            }
            columns += cell.span;
            index += 1;
        }
        return index;
    }

    fn new_cell(&self) -> TableCell {
        return if self.is_separator { TableCell::separator() } else { TableCell::empty() };
    }

    pub fn append_columns(&mut self, count: usize) {
        for _ in 0..count {
            let cell = self.new_cell();
            self.cells.push(cell);
        }
    }

    /// Insert `count` columns before `column`. Inserting inside a spanning
    /// cell widens it instead.
    pub fn insert_columns(&mut self, column: usize, count: usize) {
        if count == 0 {
            return;
        }
        if column >= self.total_columns() {
            self.append_columns(count);
            return;
        }
        let index = self.index_of(column);
        if self.column_of(index) > column {
            self.cells[index - 1].span += count;
            return;
        }
        for _ in 0..count {
            let cell = self.new_cell();
            self.cells.insert(index, cell);
        }
    }

    /// Delete `count` columns from `column` on, shrinking spanning cells
    /// that cover part of the range.
    pub fn delete_columns(&mut self, column: usize, count: usize) {
        let mut remaining = count;
        let index = self.index_of(column);
        let start = self.column_of(index);
        if start > column && index > 0 {
            let overlap = (start - column).min(count);
            self.cells[index - 1].span -= overlap;
            remaining -= overlap;
        }
        while index < self.cells.len() && remaining > 0 {
            let cell = self.cells.remove(index);
            if cell.span > remaining {
                self.cells.insert(index, cell.with_span(cell.span - remaining));
                remaining = 0;
            } else {
                remaining -= cell.span;
            }
        }
    }

    /// Move the cell starting at `from` to column `to`. Spans are rebuilt
    /// from the columns left empty after the move.
    pub fn move_column(&mut self, from: usize, to: usize) {
        let total = self.total_columns();
        if from == to || from >= total || to >= total {
            return;
        }

        let mut explicit: Vec<Option<TableCell>> = vec![None; total];
        let mut column = 0;
        for cell in self.cells.drain(..) {
            let span = cell.span;
            explicit[column] = Some(cell);
            column += span;
        }

        let moved = explicit.remove(from);
        explicit.insert(to, moved);

        let mut last: Option<TableCell> = None;
        for slot in explicit {
            last = match (slot, last) {
                (Some(cell), previous) => {
                    self.cells.extend(previous);
                    Some(cell.with_span(1))
                }
                (None, Some(previous)) => Some(previous.with_span(previous.span + 1)),
                (None, None) => Some(TableCell::empty()),
            };
        }
        self.cells.extend(last);
    }

    pub fn is_empty_column(&self, column: usize) -> bool {
        let index = self.index_of(column);
        return self.is_separator || index >= self.cells.len() || self.cells[index].text.is_blank();
    }

    pub fn is_empty(&self) -> bool {
        return !self.is_separator && self.cells.iter().all(|cell| cell.text.is_blank());
    }
}

// =============================================================================
// Table
// =============================================================================

#[derive(Debug, Clone)]
pub struct Table {
    pub rows: Vec<TableRow>,
    /// The caption line, trimmed, brackets included.
    pub caption: Option<Rope>,
    /// Spaces of indentation removed from every row.
    pub indent: usize,
    separator_row: Option<usize>,
    separator_row_count: usize,
}

impl Table {
    pub fn new(rows: Vec<TableRow>, caption: Option<Rope>, indent: usize) -> Table {
        let mut table = Table {
            rows,
            caption,
            indent,
            separator_row: None,
            separator_row_count: 0,
        };
        table.compute_separator_row();
        return table;
    }

    /// Parse `text` as one table, an optional `[caption]` line last.
    pub fn parse(text: &Rope) -> Table {
        let mut lines = text.split_parts('\n', false);
        if lines.last().is_some_and(Rope::is_empty) {
            lines.pop();
        }

        let mut caption = None;
        if let Some(last) = lines.last() {
            let trimmed = last.trim();
            if trimmed.len() >= 2 && trimmed.get(0) == Some('[') && trimmed.get(trimmed.len() - 1) == Some(']') {
                caption = Some(trimmed);
                lines.pop();
            }
        }

        let min_indent = lines.iter().map(|line| line.count_leading(&[' '])).min().unwrap_or(0);
        let indent = min_indent / 4 * 4;
        let rows = lines
            .iter()
            .map(|line| TableRow::parse(&line.sub_sequence(indent, line.len())))
            .collect();
        return Table::new(rows, caption, indent);
    }

    pub fn separator_row(&self) -> Option<usize> {
        return self.separator_row;
    }

    pub fn separator_row_count(&self) -> usize {
        return self.separator_row_count;
    }

    pub fn is_separator_row(&self, row: usize) -> bool {
        return self.separator_row == Some(row);
    }

    /// With one separator row it is that row. With more, the first one if
    /// a regular row precedes it, otherwise the second.
    pub fn compute_separator_row(&mut self) {
        let mut first = None;
        let mut second = None;
        let mut first_regular = None;
        let mut count = 0;
        for (index, row) in self.rows.iter().enumerate() {
            if row.is_separator {
                count += 1;
                if first.is_none() {
                    first = Some(index);
                } else if second.is_none() {
                    second = Some(index);
                }
            } else if first_regular.is_none() {
                first_regular = Some(index);
            }
        }

        self.separator_row = match (first, second, first_regular) {
            (first, None, _) => first,
            (Some(first), Some(_), Some(regular)) if regular < first => Some(first),
            (_, second, _) => second,
        };
        self.separator_row_count = count;
        debug!("separator row {:?} of {} candidates", self.separator_row, count);
    }

    pub fn max_columns(&self) -> usize {
        return self.max_columns_without(&[]);
    }

    pub fn min_columns(&self) -> usize {
        return self.min_columns_without(&[]);
    }

    pub fn max_columns_without(&self, skip_rows: &[usize]) -> usize {
        return self
            .rows
            .iter()
            .enumerate()
            .filter(|(index, _)| !skip_rows.contains(index))
            .map(|(_, row)| row.total_columns())
            .max()
            .unwrap_or(0);
    }

    pub fn min_columns_without(&self, skip_rows: &[usize]) -> usize {
        return self
            .rows
            .iter()
            .enumerate()
            .filter(|(index, _)| !skip_rows.contains(index))
            .map(|(_, row)| row.total_columns())
            .min()
            .unwrap_or(0);
    }

    /// Pad every row to the widest. With `column`, one of the missing
    /// columns is inserted there and the rest appended.
    pub fn fill_missing_columns(&mut self, column: Option<usize>) {
        let max_columns = self.max_columns();
        for row in &mut self.rows {
            let missing = max_columns - row.total_columns();
            if missing == 0 {
                continue;
            }
            let mut done = 0;
            if let Some(column) = column {
                row.insert_columns(column, 1);
                done = 1;
            }
            row.append_columns(missing - done);
        }
    }

    pub fn insert_columns(&mut self, column: usize, count: usize) {
        for row in &mut self.rows {
            row.insert_columns(column, count);
        }
    }

    pub fn delete_columns(&mut self, column: usize, count: usize) {
        for row in &mut self.rows {
            row.delete_columns(column, count);
        }
    }

    pub fn move_column(&mut self, from: usize, to: usize) {
        for row in &mut self.rows {
            row.move_column(from, to);
        }
    }

    pub fn insert_rows(&mut self, at: usize, count: usize) {
        let max_columns = self.max_columns();
        let at = at.min(self.rows.len());
        for _ in 0..count {
            let mut row = TableRow::new(Vec::new());
            row.append_columns(max_columns);
            self.rows.insert(at, row);
        }
        self.compute_separator_row();
    }

    pub fn insert_separator_row(&mut self, at: usize) {
        let max_columns = self.max_columns();
        let mut row = TableRow {
            cells: Vec::new(),
            is_separator: true,
        };
        row.append_columns(max_columns);
        self.rows.insert(at.min(self.rows.len()), row);
        self.compute_separator_row();
    }

    pub fn delete_rows(&mut self, at: usize, count: usize) {
        let end = (at + count).min(self.rows.len());
        if at < end {
            self.rows.drain(at..end);
        }
        self.compute_separator_row();
    }

    pub fn is_empty_column(&self, column: usize) -> bool {
        return self.rows.iter().all(|row| row.is_empty_column(column));
    }

    pub fn is_empty_row(&self, row: usize) -> bool {
        return self.rows.get(row).is_some_and(TableRow::is_empty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(text: &str) -> TableRow {
        return TableRow::parse(&Rope::from(text));
    }

    fn texts(row: &TableRow) -> Vec<(String, usize)> {
        return row.cells.iter().map(|cell| (cell.text.to_string(), cell.span)).collect();
    }

    #[test]
    fn test_separator_markers() {
        let markers = |text: &str| separator_markers(&Rope::from(text));
        assert_eq!(markers(" :-: "), Some(SeparatorMarkers { left: true, right: true }));
        assert_eq!(markers("--:"), Some(SeparatorMarkers { left: false, right: true }));
        assert_eq!(markers(":--"), Some(SeparatorMarkers { left: true, right: false }));
        assert_eq!(markers("-"), Some(SeparatorMarkers::default()));
        assert_eq!(markers(":"), None);
        assert_eq!(markers("::"), None);
        assert_eq!(markers("-a-"), None);
    }

    #[test]
    fn test_parse_pipes_and_spans() {
        assert_eq!(texts(&row("| a | b |")), vec![("a".into(), 1), ("b".into(), 1)]);
        assert_eq!(texts(&row("a||b")), vec![("a".into(), 2), ("b".into(), 1)]);
        assert_eq!(texts(&row("|a|b||")), vec![("a".into(), 1), ("b".into(), 2)]);
        assert_eq!(row("| a | b |").cells[0].untrimmed_width, 3);
        assert!(row("|---|:-:|").is_separator);
        assert!(!row("|---|x|").is_separator);
        assert!(!row("|").is_separator);
    }

    #[test]
    fn test_parse_table() {
        let text = Rope::from("    |a|b|\n    |-|-|\n    |c|d|\n    [ caption ]\n");
        let table = Table::parse(&text);
        assert_eq!(table.indent, 4);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.caption.as_ref().map(Rope::to_string), Some("[ caption ]".to_string()));
        assert_eq!(table.separator_row(), Some(1));
        let cell = &table.rows[2].cells[1];
        assert_eq!(cell.text.tracked_source_location(0).offset, text.to_string().find('d').unwrap());

        assert_eq!(Table::parse(&Rope::from("      a|b\n       c|d")).indent, 4);
    }

    #[test]
    fn test_column_index_mapping() {
        let row = row("a||b|c");
        assert_eq!(row.total_columns(), 4);
        assert_eq!(row.column_of(1), 2);
        assert_eq!(row.index_of(2), 1);
        assert_eq!(row.index_of(1), 1);
        assert_eq!(row.index_of(9), 3);
    }

    #[test]
    fn test_insert_columns() {
        let mut spanning = row("a||b");
        spanning.insert_columns(1, 2);
        assert_eq!(texts(&spanning), vec![("a".into(), 4), ("b".into(), 1)]);

        let mut plain = row("a|b");
        plain.insert_columns(1, 1);
        assert_eq!(texts(&plain), vec![("a".into(), 1), ("".into(), 1), ("b".into(), 1)]);
        plain.insert_columns(7, 1);
        assert_eq!(plain.total_columns(), 4);

        let mut separator = row("-|-");
        separator.append_columns(1);
        assert_eq!(separator.cells[2].text, "---");
    }

    #[test]
    fn test_delete_columns() {
        let mut spanning = row("a|||b");
        spanning.delete_columns(1, 1);
        assert_eq!(texts(&spanning), vec![("a".into(), 2), ("b".into(), 1)]);

        let mut plain = row("a|b|c|d");
        plain.delete_columns(1, 2);
        assert_eq!(texts(&plain), vec![("a".into(), 1), ("d".into(), 1)]);

        let mut tail = row("a|b||");
        tail.delete_columns(1, 1);
        assert_eq!(texts(&tail), vec![("a".into(), 1), ("b".into(), 1)]);
    }

    #[test]
    fn test_move_column() {
        let mut plain = row("a|b|c");
        plain.move_column(0, 2);
        assert_eq!(texts(&plain), vec![("b".into(), 1), ("c".into(), 1), ("a".into(), 1)]);

        let mut spanning = row("a||b");
        spanning.move_column(2, 0);
        assert_eq!(texts(&spanning), vec![("b".into(), 1), ("a".into(), 2)]);
    }

    #[test]
    fn test_separator_row_choice() {
        let table = |rows: &[&str]| Table::new(rows.iter().map(|text| row(text)).collect(), None, 0);
        assert_eq!(table(&["a", "-", "b"]).separator_row(), Some(1));
        assert_eq!(table(&["-", "a", "-", "b"]).separator_row(), Some(2));
        assert_eq!(table(&["a", "-", "b", "-"]).separator_row(), Some(1));
        assert_eq!(table(&["-", "-", "a"]).separator_row(), Some(1));
        assert_eq!(table(&["a", "b"]).separator_row(), None);
        assert_eq!(table(&["-", "a", "-"]).separator_row_count(), 2);
    }

    #[test]
    fn test_table_editing() {
        let mut table = Table::parse(&Rope::from("a|b|c\n-|-\nd"));
        assert_eq!(table.max_columns(), 3);
        assert_eq!(table.min_columns(), 1);
        assert_eq!(table.max_columns_without(&[0]), 2);

        table.fill_missing_columns(None);
        assert_eq!(table.min_columns(), 3);
        assert_eq!(table.rows[1].cells[2].text, "---");
        assert!(table.is_empty_column(4));
        assert!(!table.is_empty_column(0));

        table.insert_rows(1, 1);
        assert!(table.is_empty_row(1));
        assert_eq!(table.separator_row(), Some(2));
        table.delete_rows(1, 1);
        assert_eq!(table.separator_row(), Some(1));

        table.insert_separator_row(0);
        assert_eq!(table.separator_row_count(), 2);
        assert_eq!(table.separator_row(), Some(2));
    }
}
