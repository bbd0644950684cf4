use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side filename of one immutable document revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RevisionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RevisionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Bounding box in the document's native coordinate space, serialized as
/// `[left, top, right, bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

impl From<[f64; 4]> for BBox {
    fn from([left, top, right, bottom]: [f64; 4]) -> Self {
        Self::new(left, top, right, bottom)
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        [bbox.left, bbox.top, bbox.right, bbox.bottom]
    }
}

/// Style bit set reported by the server's text-layer analysis.
///
/// The bit positions are shared with the server's font-flag encoding and must
/// stay in sync with it: bit 2 underline, bit 4 bold, bit 6 italic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FontFlags(pub u32);

impl FontFlags {
    pub const UNDERLINE: u32 = 1 << 2;
    pub const BOLD: u32 = 1 << 4;
    pub const ITALIC: u32 = 1 << 6;

    pub fn is_bold(self) -> bool {
        self.0 & Self::BOLD != 0
    }

    pub fn is_italic(self) -> bool {
        self.0 & Self::ITALIC != 0
    }

    pub fn is_underline(self) -> bool {
        self.0 & Self::UNDERLINE != 0
    }

    /// Human-readable style, e.g. `"Bold, Italic"`; `"Regular"` when none of
    /// the three style bits is set.
    pub fn style_label(self) -> String {
        let mut styles = Vec::new();
        if self.is_bold() {
            styles.push("Bold");
        }
        if self.is_italic() {
            styles.push("Italic");
        }
        if self.is_underline() {
            styles.push("Underline");
        }
        if styles.is_empty() {
            "Regular".to_owned()
        } else {
            styles.join(", ")
        }
    }
}

fn default_font() -> String {
    "unknown".to_owned()
}

fn default_font_size() -> f64 {
    12.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BBox,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_font_size")]
    pub size: f64,
    #[serde(default)]
    pub flags: FontFlags,
    #[serde(default)]
    pub color: u32,
}

impl TextBlock {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn font_info(&self) -> FontInfo {
        FontInfo {
            font: self.font.clone(),
            size: self.size,
            flags: self.flags,
            color: self.color,
        }
    }
}

/// Font attributes captured when a block is selected and echoed back to the
/// server when formatting is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontInfo {
    pub font: String,
    pub size: f64,
    pub flags: FontFlags,
    pub color: u32,
}

impl FontInfo {
    pub fn describe(&self) -> FontDescription {
        let name = if self.font.is_empty() {
            "Unknown".to_owned()
        } else {
            self.font.clone()
        };
        let size = if self.size.is_finite() && self.size != 0.0 {
            self.size
        } else {
            default_font_size()
        };
        FontDescription {
            name,
            size: size.round() as i64,
            style: self.flags.style_label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDescription {
    pub name: String,
    pub size: i64,
    pub style: String,
}

impl fmt::Display for FontDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}pt {}", self.name, self.size, self.style)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageBlocks {
    #[serde(default)]
    pub page_num: u32,
    #[serde(default)]
    pub blocks: Vec<TextBlock>,
}

/// One page entry of a preview response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewPage {
    pub page_num: u32,
    /// Renderable image reference, usually a `data:image/png;base64,` URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub is_image_based: bool,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Display size of a rendered page image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A preview page after the surface has finished loading it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub page_num: u32,
    /// `None` when the server reported an error or the image could not be loaded.
    pub size: Option<ImageSize>,
    pub is_image_based: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditTextRequest {
    pub filename: RevisionId,
    pub page_num: u32,
    pub old_text: String,
    pub new_text: String,
    pub bbox: BBox,
    pub preserve_formatting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_info: Option<FontInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddTextRequest {
    pub filename: RevisionId,
    pub page_num: u32,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitRequest {
    pub filename: RevisionId,
    pub start_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page_num: u32,
    pub text: String,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextExtraction {
    pub pages: Vec<PageText>,
    pub ocr_used: bool,
    pub message: Option<String>,
}

impl TextExtraction {
    /// True when at least one page carries more than a trivial amount of text.
    pub fn has_meaningful_text(pages: &[PageText]) -> bool {
        pages.iter().any(|page| page.text.trim().chars().count() > 10)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordConversion {
    pub word_filename: String,
    #[serde(default)]
    pub pages_processed: u32,
    #[serde(default)]
    pub text_blocks_processed: u32,
}
