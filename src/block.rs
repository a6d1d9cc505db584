//! Extracted text blocks and the structural vocabulary shared by the
//! planner and the reassembler.
//!
//! A [`TextBlock`] is what the extractor hands over: one visually contiguous
//! run of text on one page, with enough layout metadata (position, font
//! size, font flags) to guess its role. Blocks are immutable once extracted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box in top-down page coordinates (points).
///
/// `y0` is the top edge and `y1` the bottom edge; y grows downward, the same
/// convention PyMuPDF and most layout tools use. The pdfium extractor flips
/// PDF's bottom-up coordinates before building blocks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// Font style bits reported by the extractor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FontFlags(u8);

impl FontFlags {
    pub const NONE: FontFlags = FontFlags(0);
    pub const BOLD: FontFlags = FontFlags(1);
    pub const ITALIC: FontFlags = FontFlags(1 << 1);
    pub const MONOSPACE: FontFlags = FontFlags(1 << 2);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: FontFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_bold(self) -> bool {
        self.contains(FontFlags::BOLD)
    }

    pub fn insert(&mut self, other: FontFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for FontFlags {
    type Output = FontFlags;

    fn bitor(self, rhs: FontFlags) -> FontFlags {
        FontFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for FontFlags {
    type Output = FontFlags;

    fn bitand(self, rhs: FontFlags) -> FontFlags {
        FontFlags(self.0 & rhs.0)
    }
}

impl fmt::Debug for FontFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(FontFlags::BOLD) {
            names.push("BOLD");
        }
        if self.contains(FontFlags::ITALIC) {
            names.push("ITALIC");
        }
        if self.contains(FontFlags::MONOSPACE) {
            names.push("MONOSPACE");
        }
        if names.is_empty() {
            write!(f, "FontFlags(NONE)")
        } else {
            write!(f, "FontFlags({})", names.join(" | "))
        }
    }
}

/// One block of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    /// 0-based page index.
    pub page: usize,
    pub bbox: BBox,
    pub text: String,
    /// Dominant font size in points.
    pub font_size: f32,
    pub font_flags: FontFlags,
}

impl TextBlock {
    pub fn new(page: usize, bbox: BBox, text: impl Into<String>, font_size: f32) -> Self {
        Self {
            page,
            bbox,
            text: text.into(),
            font_size,
            font_flags: FontFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: FontFlags) -> Self {
        self.font_flags = flags;
        self
    }

    /// Length in Unicode scalar values, the unit every size budget uses.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Structural role of a block, derived from font and position heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    HeadingCandidate,
    Paragraph,
    TableRow,
    /// Page furniture and empty blocks.
    Other,
}

/// A heading the planner found, with the depth the document's font-size
/// ranking assigns it. Travels with the chunk so the reassembler can
/// override whatever depth the model picked locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingHint {
    /// Normalised heading text (see [`crate::pipeline::structure::normalise_line`]).
    pub key: String,
    /// 1 = largest heading size in the document.
    pub depth: u8,
}
