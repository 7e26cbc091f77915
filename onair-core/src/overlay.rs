//! Overlay composition
//!
//! Image overlays (logo, banner) are extra encoder inputs combined with the
//! main picture through an ffmpeg filter graph. The graph is built from an
//! ordered list of placements: placement `i` reads encoder input `i + 1`, the
//! first one draws onto `[0:v]` and the last one writes `[out]`.
//!
//! The program-name text is a `drawtext` filter chained after the image
//! graph, or applied straight to `[0:v]` when there are no images.

use std::path::PathBuf;

use tracing as log;

use crate::config::{OverlayConfig, ProgramNameConfig};

/// Label of the image overlay graph output
pub const OVERLAY_OUTPUT: &str = "[out]";
/// Label used when text is chained after the image overlays
pub const TEXT_OUTPUT: &str = "[out_final]";

/// Source of image overlay inputs for the encoder
pub trait OverlayProvider: Send + Sync {
    /// Image files to add as encoder inputs, in placement order
    fn overlay_inputs(&self) -> Vec<PathBuf>;

    /// Filter graph over `[0:v]` and the overlay inputs, ending in `[out]`
    fn filter_graph(&self) -> Option<String>;
}

/// Provider for when overlays are switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl OverlayProvider for NoOverlay {
    fn overlay_inputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn filter_graph(&self) -> Option<String> {
        None
    }
}

/// Where one overlay image is drawn, as ffmpeg position expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub x: String,
    pub y: String,
}

impl Placement {
    #[must_use]
    pub fn top_left(x: i32, y: i32) -> Self {
        Self {
            x: x.to_string(),
            y: y.to_string(),
        }
    }

    /// Anchored to the bottom edge, `offset` pixels above it
    #[must_use]
    pub fn bottom(x: i32, offset: i32) -> Self {
        Self {
            x: x.to_string(),
            y: format!("H-h-{offset}"),
        }
    }
}

/// Build the image overlay graph for `placements`
#[must_use]
pub fn compose_overlay_graph(placements: &[Placement]) -> Option<String> {
    if placements.is_empty() {
        return None;
    }

    let last = placements.len() - 1;
    let mut fragments = Vec::with_capacity(placements.len());
    let mut previous = "[0:v]".to_string();
    for (i, placement) in placements.iter().enumerate() {
        let output = if i == last {
            OVERLAY_OUTPUT.to_string()
        } else if i == 0 {
            "[tmp]".to_string()
        } else {
            format!("[tmp{i}]")
        };
        fragments.push(format!(
            "{previous}[{}:v]overlay={}:{}{output}",
            i + 1,
            placement.x,
            placement.y
        ));
        previous = output;
    }

    Some(fragments.join(";"))
}

/// A complete filter graph and the label to map as video output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    pub graph: String,
    pub output: &'static str,
}

/// Append the text filter to the image graph, if any
#[must_use]
pub fn chain_text(image_graph: Option<String>, text_filter: Option<String>) -> Option<FilterGraph> {
    match (image_graph, text_filter) {
        (Some(graph), Some(text)) => Some(FilterGraph {
            graph: format!("{graph};{OVERLAY_OUTPUT}{text}{TEXT_OUTPUT}"),
            output: TEXT_OUTPUT,
        }),
        (Some(graph), None) => Some(FilterGraph {
            graph,
            output: OVERLAY_OUTPUT,
        }),
        (None, Some(text)) => Some(FilterGraph {
            graph: format!("[0:v]{text}{OVERLAY_OUTPUT}"),
            output: OVERLAY_OUTPUT,
        }),
        (None, None) => None,
    }
}

/// Escape text for use inside a quoted drawtext option
#[must_use]
pub fn escape_drawtext(text: &str) -> String {
    text.replace(':', "\\:").replace('\'', "'\\\\''")
}

#[must_use]
pub fn drawtext_filter(text: &str, config: &ProgramNameConfig) -> String {
    format!(
        "drawtext=text='{}':fontfile={}:fontsize={}:fontcolor={}:x={}:y={}:box=1:boxcolor={}:boxborderw={}",
        escape_drawtext(text),
        config.font_path.display(),
        config.font_size,
        config.font_color,
        config.x,
        config.y,
        config.box_color,
        config.box_border_width
    )
}

/// The program-name filter, when it can be drawn.
///
/// Skipped when disabled, when the name is empty, or when the font file is
/// missing.
#[must_use]
pub fn program_name_filter(config: &ProgramNameConfig, program_name: &str) -> Option<String> {
    if !config.enabled || program_name.is_empty() {
        return None;
    }
    if !config.font_path.exists() {
        log::warn!(
            "Font file not found at {:?}, skipping program name overlay",
            config.font_path
        );
        return None;
    }
    Some(drawtext_filter(program_name, config))
}

/// Overlays read from fixed paths in the configuration.
///
/// Image files are checked on every call, so dropping in or deleting a logo
/// takes effect at the next encoder start.
#[derive(Debug, Clone)]
pub struct StaticOverlay {
    config: OverlayConfig,
}

impl StaticOverlay {
    #[must_use]
    pub const fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    fn logo_ready(&self) -> bool {
        self.config.logo_enabled && self.config.logo_path.exists()
    }

    fn banner_ready(&self) -> bool {
        self.config.banner_enabled && self.config.banner_path.exists()
    }
}

impl OverlayProvider for StaticOverlay {
    fn overlay_inputs(&self) -> Vec<PathBuf> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut inputs = Vec::new();
        if self.logo_ready() {
            inputs.push(self.config.logo_path.clone());
        }
        if self.banner_ready() {
            inputs.push(self.config.banner_path.clone());
        }
        inputs
    }

    fn filter_graph(&self) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let mut placements = Vec::new();
        if self.logo_ready() {
            placements.push(Placement::top_left(self.config.logo_x, self.config.logo_y));
        }
        if self.banner_ready() {
            placements.push(Placement::bottom(
                self.config.banner_x,
                self.config.banner_bottom_offset,
            ));
        }
        compose_overlay_graph(&placements)
    }
}
