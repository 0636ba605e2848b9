//! Column width balancing for tables with spanning cells.
//!
//! Cells register their content width per column, spanning cells per span.
//! Each registration hands back a width cell that is an alias until
//! [`ColumnBalancer::finalize`] points it at the balanced result. From then
//! on the widths follow the registered cells: changing any content width
//! re-balances the whole table the next time a width is read.
//!
//! Balancing is a fixed point over the spans. Every column starts at its
//! widest single-column content. Each pass, every span spreads its deficit
//! over the columns it has not fixed yet, and a column becomes fixed for
//! all spans once the extra width assigned to it is the largest any span
//! asked for in that pass.

use std::cmp::Reverse;
use std::rc::Rc;

use log::{debug, trace};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::rope::TextAlignment;
use crate::version::{
    version_of, Alias, AsVersion, Clock, DependentCell, ImmutableCell, Shared, VersionRef, Versioned,
};

/// One spanning cell's request: `length` units over `[start, end)`, with
/// `offset` extra units the rendered cell gives back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRequest {
    pub start: usize,
    pub end: usize,
    pub offset: usize,
    pub length: usize,
}

impl SpanRequest {
    fn required(&self) -> usize {
        return self.length + self.offset;
    }
}

struct SpanInput {
    start: usize,
    end: usize,
    offset: usize,
    length: Shared<usize>,
    width: Rc<Alias<usize>>,
}

pub struct ColumnBalancer {
    clock: Clock,
    min_column_width: usize,
    space_width: usize,
    lengths: Vec<Vec<Shared<usize>>>,
    spans: Vec<SpanInput>,
    widths: Vec<Rc<Alias<usize>>>,
    alignments: Vec<Rc<Alias<TextAlignment>>>,
    aligned: Vec<bool>,
}

impl Default for ColumnBalancer {
    fn default() -> ColumnBalancer {
        return ColumnBalancer::new(0, 1);
    }
}

impl ColumnBalancer {
    /// `space_width` is the unit padding is added in. Final widths are
    /// rounded up to multiples of it when it is above 1.
    pub fn new(min_column_width: usize, space_width: usize) -> ColumnBalancer {
        return ColumnBalancer::new_in(&Clock::current(), min_column_width, space_width);
    }

    /// A balancer whose width and alignment cells live on `clock`.
    pub fn new_in(clock: &Clock, min_column_width: usize, space_width: usize) -> ColumnBalancer {
        return ColumnBalancer {
            clock: clock.clone(),
            min_column_width,
            space_width: space_width.max(1),
            lengths: Vec::new(),
            spans: Vec::new(),
            widths: Vec::new(),
            alignments: Vec::new(),
            aligned: Vec::new(),
        };
    }

    pub fn column_count(&self) -> usize {
        return self.widths.len();
    }

    fn ensure_columns(&mut self, count: usize) {
        while self.widths.len() < count {
            self.widths.push(Alias::new_in(&self.clock, ImmutableCell::new(0)));
            self.alignments.push(Alias::new_in(&self.clock, ImmutableCell::new(TextAlignment::Left)));
            self.aligned.push(false);
            self.lengths.push(Vec::new());
        }
    }

    /// Register a single-column content width.
    pub fn column_width(&mut self, column: usize, length: Shared<usize>) -> Shared<usize> {
        self.ensure_columns(column + 1);
        self.lengths[column].push(length);
        return self.widths[column].clone();
    }

    /// Register a cell of `span` columns starting at `column`. The returned
    /// cell is the width the cell gets to fill: the sum of its columns
    /// minus `offset`.
    pub fn width(&mut self, column: usize, length: Shared<usize>, span: usize, offset: usize) -> Result<Shared<usize>> {
        if span == 0 {
            return Err(Error::InvalidSpan(span));
        }
        if span == 1 && offset == 0 {
            return Ok(self.column_width(column, length));
        }
        self.ensure_columns(column + span);
        let width = Alias::new_in(&self.clock, ImmutableCell::new(0));
        self.spans.push(SpanInput {
            start: column,
            end: column + span,
            offset,
            length,
            width: width.clone(),
        });
        return Ok(width as Shared<usize>);
    }

    /// Use `alignment` for every cell of `column`.
    pub fn alignment(&mut self, column: usize, alignment: Shared<TextAlignment>) -> Result<()> {
        self.ensure_columns(column + 1);
        if self.aligned[column] {
            return Err(Error::AlignmentRedefined { column });
        }
        self.aligned[column] = true;
        self.alignments[column].set_target(alignment);
        return Ok(());
    }

    /// The alignment of `column`, `Left` unless one was registered.
    pub fn alignment_cell(&mut self, column: usize) -> Shared<TextAlignment> {
        self.ensure_columns(column + 1);
        return self.alignments[column].clone();
    }

    /// Wire every handed out width cell to the balanced layout.
    ///
    /// Calling it again after more registrations rebuilds the layout.
    pub fn finalize(&mut self) {
        let columns = self.widths.len();
        let mut deps: Vec<VersionRef> = Vec::new();
        for lengths in &self.lengths {
            deps.extend(lengths.iter().map(version_of));
        }
        deps.extend(self.spans.iter().map(|span| version_of(&span.length)));

        let lengths = self.lengths.clone();
        let spans: Vec<(usize, usize, usize, Shared<usize>)> = self
            .spans
            .iter()
            .map(|span| (span.start, span.end, span.offset, span.length.clone()))
            .collect();
        let (min_column_width, space_width) = (self.min_column_width, self.space_width);

        let layout = DependentCell::new_in(&self.clock, deps, move || -> Rc<[usize]> {
            let base: Vec<usize> = lengths
                .iter()
                .map(|cells| cells.iter().map(|cell| cell.get()).fold(min_column_width, usize::max))
                .collect();
            let requests: Vec<SpanRequest> = spans
                .iter()
                .map(|(start, end, offset, length)| SpanRequest {
                    start: *start,
                    end: *end,
                    offset: *offset,
                    length: length.get(),
                })
                .collect();
            let widths = balance(&base, &requests);
            return round_to_spaces(&widths, space_width).into();
        });

        for (column, width) in self.widths.iter().enumerate() {
            let layout = layout.clone();
            let cell = DependentCell::new_in(&self.clock, vec![layout.clone().as_version()], move || layout.get()[column]);
            width.set_target(cell);
        }
        for span in &self.spans {
            let layout = layout.clone();
            let (start, end, offset) = (span.start, span.end, span.offset);
            let cell = DependentCell::new_in(&self.clock, vec![layout.clone().as_version()], move || {
                let sum: usize = layout.get()[start..end].iter().sum();
                sum.saturating_sub(offset)
            });
            span.width.set_target(cell);
        }
        debug!("table finalized: {} columns, {} spans", columns, self.spans.len());
    }
}

// =============================================================================
// Balancing
// =============================================================================

struct SpanState {
    request: SpanRequest,
    fixed: SmallVec<[bool; 8]>,
    unfixed: SmallVec<[usize; 8]>,
    additional: SmallVec<[usize; 8]>,
}

impl SpanState {
    fn new(request: SpanRequest) -> SpanState {
        let len = request.end - request.start;
        return SpanState {
            request,
            fixed: SmallVec::from_elem(false, len),
            unfixed: SmallVec::new(),
            additional: SmallVec::from_elem(0, len),
        };
    }

    /// Spread this span's deficit over its unfixed columns.
    fn distribute(&mut self, base: &[usize], extra: &[usize]) {
        let SpanRequest { start, end, .. } = self.request;
        self.unfixed.clear();
        let mut covered = 0;
        for column in start..end {
            if self.fixed[column - start] {
                covered += base[column] + extra[column];
            } else {
                covered += base[column];
                self.unfixed.push(column);
            }
        }
        if self.unfixed.is_empty() {
            return;
        }

        let deficit = self.request.required().saturating_sub(covered);
        let whole = deficit / self.unfixed.len();
        let mut remainder = deficit % self.unfixed.len();
        let mut order = self.unfixed.clone();
        order.sort_by_key(|&column| (Reverse(base[column]), column));
        for column in order {
            let share = if remainder > 0 { 1 } else { 0 };
            remainder -= share;
            self.additional[column - start] = whole + share;
        }
    }

    fn fix(&mut self, extra: &[usize], fixed_extra: usize) -> bool {
        let start = self.request.start;
        let mut still_unfixed = SmallVec::new();
        for &column in &self.unfixed {
            if extra[column] >= fixed_extra {
                self.fixed[column - start] = true;
                self.additional[column - start] = fixed_extra;
            } else {
                still_unfixed.push(column);
            }
        }
        self.unfixed = still_unfixed;
        return !self.unfixed.is_empty();
    }
}

/// Final column widths for `base` content widths and spanning requests.
///
/// Every column ends at least at its base width and every span's columns
/// sum to at least its length plus offset. The result does not depend on
/// the order of `spans`.
pub fn balance(base: &[usize], spans: &[SpanRequest]) -> Vec<usize> {
    let mut extra = vec![0; base.len()];
    let mut states: Vec<SpanState> = spans
        .iter()
        .filter(|span| span.start < span.end && span.end <= base.len())
        .map(|&span| SpanState::new(span))
        .collect();

    let mut pass = 0;
    let mut unfixed = !states.is_empty();
    while unfixed {
        pass += 1;
        for state in &mut states {
            state.distribute(base, &extra);
        }
        for state in &states {
            for &column in &state.unfixed {
                extra[column] = 0;
            }
        }

        let mut fixed_extra = 0;
        for state in &states {
            for &column in &state.unfixed {
                let additional = state.additional[column - state.request.start];
                if extra[column] < additional {
                    extra[column] = additional;
                    fixed_extra = fixed_extra.max(additional);
                }
            }
        }

        unfixed = false;
        for state in &mut states {
            if !state.unfixed.is_empty() && state.fix(&extra, fixed_extra) {
                unfixed = true;
            }
        }
        trace!("balance pass {} fixed extra width {}", pass, fixed_extra);
    }

    return base.iter().zip(extra).map(|(base, extra)| base + extra).collect();
}

/// Round widths up to whole multiples of `space_width`. Every column
/// keeps at least the width it was given, so padding in spaces never has
/// to fall short of the content.
pub fn round_to_spaces(widths: &[usize], space_width: usize) -> Vec<usize> {
    if space_width <= 1 {
        return widths.to_vec();
    }
    return widths.iter().map(|width| width.div_ceil(space_width) * space_width).collect();
}
