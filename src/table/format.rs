//! Pipe table formatting.
//!
//! The formatter parses a table, wraps every cell in a [`Variable`] whose
//! width and alignment come from a [`ColumnBalancer`], and joins the cells
//! back with pipes. The returned rope is live: it lays itself out from the
//! balancer's cells when read, and every content char in it still tracks
//! back to its offset in the input.

use std::rc::Rc;

use log::{debug, warn};

use super::balancer::ColumnBalancer;
use super::model::{separator_markers, Table, TableCell};
use super::settings::{CaptionMode, CaptionSpaces, FormatSettings, LeftAlignMarker};
use super::width::{CharWidthProvider, UnityWidth};
use crate::error::Result;
use crate::rope::{Rope, TextAlignment, Variable};
use crate::version::{version_of, Clock, DependentCell, ImmutableCell};

pub struct TableFormatter {
    settings: FormatSettings,
    widths: Rc<dyn CharWidthProvider>,
    clock: Clock,
}

/// Where a cell sits in its row.
#[derive(Clone, Copy)]
struct Slot {
    column: usize,
    last: bool,
}

impl TableFormatter {
    pub fn new(settings: FormatSettings) -> TableFormatter {
        return TableFormatter {
            settings,
            widths: Rc::new(UnityWidth),
            clock: Clock::current(),
        };
    }

    /// Build output cells on `clock` instead of the thread's clock.
    pub fn with_clock(mut self, clock: Clock) -> TableFormatter {
        self.clock = clock;
        return self;
    }

    pub fn with_width_provider(mut self, widths: Rc<dyn CharWidthProvider>) -> TableFormatter {
        self.widths = widths;
        return self;
    }

    pub fn settings(&self) -> &FormatSettings {
        return &self.settings;
    }

    pub fn format_str(&self, text: &str) -> Result<String> {
        let rope = self.format(&Rope::from(text))?;
        return Ok(rope.to_string());
    }

    /// Format the table in `text`. Every output line ends in `\n`.
    pub fn format(&self, text: &Rope) -> Result<Rope> {
        let settings = &self.settings;
        let mut table = Table::parse(text);
        if settings.fill_missing_columns {
            table.fill_missing_columns(None);
        }

        let space_width = self.widths.space_width();
        let mut balancer = ColumnBalancer::new_in(&self.clock, settings.min_column_width * space_width, space_width);
        let indent = Rope::repeated(' ', table.indent);
        let mut lines = Vec::with_capacity(table.rows.len() + 1);

        for (row_index, row) in table.rows.iter().enumerate() {
            let aligns = settings.apply_column_alignment && table.is_separator_row(row_index);
            let mut parts = Vec::with_capacity(row.cells.len() * 2 + 3);
            parts.push(indent.clone());
            if settings.lead_trail_pipes {
                parts.push(pipes(1));
            }

            let mut column = 0;
            let mut last_span = 1;
            for (index, cell) in row.cells.iter().enumerate() {
                if index > 0 {
                    parts.push(pipes(last_span));
                }
                let slot = Slot {
                    column,
                    last: index + 1 == row.cells.len(),
                };
                let variable = if row.is_separator {
                    self.separator_cell(cell, slot, aligns, &mut balancer)?
                } else {
                    self.content_cell(cell, slot)
                };
                self.bind_width(&variable, cell, slot, row.is_separator, &mut balancer)?;
                if settings.apply_column_alignment {
                    variable.connect_alignment(balancer.alignment_cell(column));
                }
                parts.push(variable.rope());
                last_span = cell.span;
                column += cell.span;
            }

            if settings.lead_trail_pipes || last_span > 1 {
                parts.push(pipes(last_span));
            }
            parts.push(Rope::from("\n"));
            // Separator cells start out empty and are sized by the balancer later.
            let parts = parts.into_iter().filter(|part| part.is_mutable() || !part.is_empty());
            lines.push(Rope::from_segments_in(&self.clock, parts));
        }

        balancer.finalize();
        if let Some(caption) = self.caption(table.caption.as_ref()) {
            lines.push(Rope::from_segments_in(&self.clock, [indent, caption, Rope::from("\n")]));
        }
        return Ok(Rope::from_segments_in(&self.clock, lines));
    }

    fn content_cell(&self, cell: &TableCell, slot: Slot) -> Rc<Variable> {
        let settings = &self.settings;
        let variable = Variable::new_in(&self.clock, cell.text.clone());
        if settings.space_around_pipes && (settings.lead_trail_pipes || slot.column > 0) {
            variable.set_prefix(Rope::from(" "));
        }
        if settings.space_around_pipes && (settings.lead_trail_pipes || !slot.last) {
            variable.set_suffix(Rope::from(" "));
        }
        return variable;
    }

    /// Separator cells are redrawn from their markers: `-` fill with `:`
    /// on the aligned sides.
    fn separator_cell(
        &self,
        cell: &TableCell,
        slot: Slot,
        aligns: bool,
        balancer: &mut ColumnBalancer,
    ) -> Result<Rc<Variable>> {
        let settings = &self.settings;
        let markers = separator_markers(&cell.text).unwrap_or_default();
        let alignment = match (markers.left, markers.right) {
            (true, true) => TextAlignment::Center,
            (_, true) => TextAlignment::Right,
            _ => TextAlignment::Left,
        };
        if aligns {
            balancer.alignment(slot.column, ImmutableCell::new(alignment))?;
        }

        if !settings.adjust_column_width {
            let variable = Variable::new_in(&self.clock, cell.text.clone());
            variable.set_pad_char('-');
            return Ok(variable);
        }

        let variable = Variable::with_chars_in(&self.clock, cell.text.clone(), Rope::empty());
        variable.set_pad_char('-');
        let marker = || Rope::from(":");
        match alignment {
            TextAlignment::Center => {
                variable.set_prefix(marker());
                variable.set_suffix(marker());
            }
            TextAlignment::Right => variable.set_suffix(marker()),
            TextAlignment::Left | TextAlignment::Justified => {
                let keep = match settings.left_align_marker {
                    LeftAlignMarker::Add => true,
                    LeftAlignMarker::AsIs => markers.left,
                    LeftAlignMarker::Remove => false,
                };
                if keep {
                    variable.set_prefix(marker());
                }
            }
        }
        return Ok(variable);
    }

    fn bind_width(
        &self,
        variable: &Rc<Variable>,
        cell: &TableCell,
        slot: Slot,
        separator: bool,
        balancer: &mut ColumnBalancer,
    ) -> Result<()> {
        let settings = &self.settings;
        if !settings.adjust_column_width {
            let width = if settings.trim_cells { cell.text.len() } else { cell.untrimmed_width };
            variable.set_width(width);
            return Ok(());
        }

        let widths = &self.widths;
        let units = widths.rope_width(&variable.prefix())
            + widths.rope_width(&variable.variable_chars())
            + widths.rope_width(&variable.suffix());
        let chars = variable.fixed_length().get();
        // A trailing span without closing pipes shows one pipe more.
        let offset = if cell.span > 1 && slot.last && !settings.lead_trail_pipes {
            widths.char_width('|')
        } else {
            0
        };

        // A separator keeps at least one dash between its markers.
        let request = if separator { units + widths.char_width('-') } else { units };
        let balanced = balancer.width(slot.column, ImmutableCell::new(request), cell.span, offset)?;
        let space_width = widths.space_width();
        let width = DependentCell::new_in(&self.clock, vec![version_of(&balanced)], move || {
            chars + balanced.get().saturating_sub(units) / space_width
        });
        variable.connect_width(width);
        return Ok(());
    }

    fn caption(&self, caption: Option<&Rope>) -> Option<Rope> {
        let settings = &self.settings;
        let caption = match (settings.caption, caption) {
            (CaptionMode::Remove, Some(_)) => {
                debug!("caption removed");
                return None;
            }
            (CaptionMode::RemoveEmpty, Some(caption)) if inner(caption).is_blank() => {
                debug!("empty caption removed");
                return None;
            }
            (CaptionMode::Add, None) => {
                debug!("empty caption added");
                Rope::from("[]")
            }
            (_, Some(caption)) => caption.clone(),
            (_, None) => {
                if settings.caption_spaces != CaptionSpaces::AsIs {
                    warn!("caption spaces {:?} not applied: the table has no caption", settings.caption_spaces);
                }
                return None;
            }
        };

        let text = inner(&caption);
        return Some(match settings.caption_spaces {
            CaptionSpaces::AsIs => caption,
            CaptionSpaces::Remove => bracketed(text.trim(), ""),
            CaptionSpaces::Add if text.is_blank() => Rope::from("[]"),
            CaptionSpaces::Add => bracketed(text.trim(), " "),
        });
    }
}

impl Default for TableFormatter {
    fn default() -> TableFormatter {
        return TableFormatter::new(FormatSettings::default());
    }
}

fn pipes(count: usize) -> Rope {
    return Rope::repeated('|', count);
}

/// Caption text between the brackets.
fn inner(caption: &Rope) -> Rope {
    return caption.sub_sequence(1, caption.len() - 1);
}

fn bracketed(text: Rope, space: &str) -> Rope {
    let open = Rope::from(format!("[{space}"));
    let close = Rope::from(format!("{space}]"));
    return Rope::from_segments([open, text, close].into_iter().filter(|part| !part.is_empty()));
}
