use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Which half of the dual-pane view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelSide {
    Left,
    Right,
}

impl PanelSide {
    pub const BOTH: [PanelSide; 2] = [PanelSide::Left, PanelSide::Right];

    pub fn sibling(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for PanelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Horizontal placement of pages inside a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

impl Alignment {
    /// Alignment for `side` in facing mode (pages meet at the divider) or
    /// centered mode.
    pub fn for_side(side: PanelSide, facing: bool) -> Self {
        match (facing, side) {
            (false, _) => Self::Center,
            (true, PanelSide::Left) => Self::Right,
            (true, PanelSide::Right) => Self::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub page: u32,
    pub zoom: f32,
}

/// A stored pair of documents: the original and its translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSet {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub original_path: PathBuf,
    pub translated_path: PathBuf,
    pub bookmark: Option<Bookmark>,
}

impl DocumentSet {
    pub const ORIGINAL_FILE: &'static str = "original.pdf";
    pub const TRANSLATED_FILE: &'static str = "translated.pdf";

    /// New set with a fresh id whose documents live in `<sets_root>/<id>`.
    pub fn new(name: impl Into<String>, sets_root: &Path) -> Self {
        let id = Uuid::new_v4().to_string();
        let set_dir = sets_root.join(&id);

        Self {
            original_path: set_dir.join(Self::ORIGINAL_FILE),
            translated_path: set_dir.join(Self::TRANSLATED_FILE),
            id,
            name: name.into(),
            created_at: Utc::now(),
            last_opened_at: None,
            bookmark: None,
        }
    }

    pub fn path_for(&self, side: PanelSide) -> &Path {
        match side {
            PanelSide::Left => &self.original_path,
            PanelSide::Right => &self.translated_path,
        }
    }
}

/// Persisted viewer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewerPreferences {
    /// Fixed raster scale applied to every page.
    pub render_scale: f32,
    /// Rows rasterized between cancellation checks.
    pub band_rows: u32,
    /// Distance in pixels under which a reported scroll offset is treated as
    /// the echo of a programmatic one.
    pub scroll_epsilon: f32,
    /// Vertical gap between consecutive pages.
    pub page_gap_px: f32,
    /// Height of each panel's visible area.
    pub viewport_height_px: f32,
    pub facing: bool,
}

impl Default for ViewerPreferences {
    fn default() -> Self {
        Self {
            render_scale: 1.5,
            band_rows: 64,
            scroll_epsilon: 0.5,
            page_gap_px: 16.0,
            viewport_height_px: 800.0,
            facing: true,
        }
    }
}

impl ViewerPreferences {
    /// Copy with out-of-range values replaced by defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            render_scale: if self.render_scale.is_finite() && self.render_scale > 0.0 {
                self.render_scale
            } else {
                defaults.render_scale
            },
            band_rows: self.band_rows.max(1),
            scroll_epsilon: self.scroll_epsilon.max(0.0),
            page_gap_px: self.page_gap_px.max(0.0),
            viewport_height_px: self.viewport_height_px.max(0.0),
            facing: self.facing,
        }
    }
}
