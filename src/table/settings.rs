//! Formatter configuration, loadable from TOML.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What happens to the `:` marking an explicitly left aligned column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeftAlignMarker {
    Remove,
    AsIs,
    #[default]
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptionMode {
    #[default]
    AsIs,
    /// Emit `[]` when the table has no caption.
    Add,
    /// Drop a caption with nothing but whitespace inside the brackets.
    RemoveEmpty,
    Remove,
}

/// Whitespace inside the caption brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptionSpaces {
    #[default]
    AsIs,
    Remove,
    /// Exactly one space inside each bracket.
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FormatSettings {
    pub lead_trail_pipes: bool,
    pub space_around_pipes: bool,
    pub adjust_column_width: bool,
    pub apply_column_alignment: bool,
    pub fill_missing_columns: bool,
    pub trim_cells: bool,
    pub left_align_marker: LeftAlignMarker,
    pub caption: CaptionMode,
    pub caption_spaces: CaptionSpaces,
    pub min_column_width: usize,
}

impl Default for FormatSettings {
    fn default() -> FormatSettings {
        return FormatSettings {
            lead_trail_pipes: true,
            space_around_pipes: true,
            adjust_column_width: true,
            apply_column_alignment: true,
            fill_missing_columns: true,
            trim_cells: false,
            left_align_marker: LeftAlignMarker::Add,
            caption: CaptionMode::AsIs,
            caption_spaces: CaptionSpaces::AsIs,
            min_column_width: 3,
        };
    }
}

impl FormatSettings {
    /// Settings from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<FormatSettings> {
        return toml::from_str(text).map_err(|error| Error::Config(error.to_string()));
    }

    pub fn to_toml_string(&self) -> Result<String> {
        return toml::to_string(self).map_err(|error| Error::Config(error.to_string()));
    }
}
