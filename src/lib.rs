//! Trellis - versioned, source-tracking text for formatters.
//!
//! Three layers build on each other:
//!
//! - [`version`]: a lazily recomputed dependency graph of versioned cells
//! - [`rope`]: persistent char sequences that remember where every char
//!   came from, including [`rope::Variable`] nodes bound to cells
//! - [`table`]: a Markdown pipe table formatter whose output stays wired
//!   to its column widths
//!
//! # Quick Start
//!
//! ```
//! use trellis::rope::Rope;
//! use trellis::table::{FormatSettings, TableFormatter};
//!
//! let input = Rope::from("|a|bb|\n|-|--:|\n|ccc|d|\n");
//! let output = TableFormatter::new(FormatSettings::default()).format(&input).unwrap();
//! assert_eq!(output.to_string(), "| a   | bb |\n|:----|---:|\n| ccc |  d |\n");
//!
//! // Output chars map back to the input.
//! let at = output.to_string().find("ccc").unwrap();
//! assert_eq!(output.tracked_source_location(at).offset, 16);
//! ```

pub mod error;
pub mod rope;
pub mod table;
pub mod version;

pub use error::{Error, Result};
