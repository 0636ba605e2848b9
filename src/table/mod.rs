//! Markdown pipe tables.
//!
//! [`Table`] parses and edits the table structure, [`ColumnBalancer`]
//! solves column widths across spanning cells, and [`TableFormatter`] puts
//! both together into a live, source-tracking rope.

pub mod balancer;
pub mod format;
pub mod model;
pub mod settings;
pub mod width;

pub use balancer::{balance, round_to_spaces, ColumnBalancer, SpanRequest};
pub use format::TableFormatter;
pub use model::{separator_markers, SeparatorMarkers, Table, TableCell, TableRow};
pub use settings::{CaptionMode, CaptionSpaces, FormatSettings, LeftAlignMarker};
pub use width::{CharWidthProvider, FontMetrics, UnicodeWidth, UnityWidth};
