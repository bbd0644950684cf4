//! Maps text-block bounding boxes onto the pixel space of rendered pages.
//!
//! The server does not report a page's native size alongside its blocks, so the
//! extent is inferred from the largest right and bottom edges among the page's
//! blocks. A page whose text stops well short of its true edges is therefore
//! scaled too large; callers should treat the mapping as an approximation.

use crate::model::{BBox, ImageSize, PageBlocks, RenderedPage, TextBlock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn from_bbox(bbox: BBox, scale_x: f64, scale_y: f64) -> Self {
        Self {
            x: bbox.left * scale_x,
            y: bbox.top * scale_y,
            width: bbox.width() * scale_x,
            height: bbox.height() * scale_y,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Clickable region for one non-blank text block.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRegion {
    /// Index into the page's full block sequence, blank blocks included.
    pub block_index: usize,
    pub rect: PixelRect,
    /// Hover text.
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageOverlay {
    pub page_num: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub regions: Vec<OverlayRegion>,
}

impl PageOverlay {
    /// Block index under `(x, y)`. Regions attached later sit on top.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<usize> {
        self.regions
            .iter()
            .rev()
            .find(|region| region.rect.contains(x, y))
            .map(|region| region.block_index)
    }
}

/// Largest right and bottom edges across every block on the page.
///
/// Returns `None` when either extent is not positive, since no finite scale
/// can be derived from it.
pub fn inferred_extent(blocks: &[TextBlock]) -> Option<(f64, f64)> {
    let (max_x, max_y) = blocks.iter().fold((0.0_f64, 0.0_f64), |(x, y), block| {
        (x.max(block.bbox.right), y.max(block.bbox.bottom))
    });
    if max_x > 0.0 && max_y > 0.0 && max_x.is_finite() && max_y.is_finite() {
        Some((max_x, max_y))
    } else {
        None
    }
}

pub fn layout_page(page_num: u32, image: ImageSize, blocks: &[TextBlock]) -> Option<PageOverlay> {
    let (max_x, max_y) = inferred_extent(blocks)?;
    let scale_x = image.width / max_x;
    let scale_y = image.height / max_y;

    let regions = blocks
        .iter()
        .enumerate()
        .filter(|(_, block)| !block.is_blank())
        .map(|(block_index, block)| OverlayRegion {
            block_index,
            rect: PixelRect::from_bbox(block.bbox, scale_x, scale_y),
            title: block.text.clone(),
        })
        .collect();

    Some(PageOverlay {
        page_num,
        scale_x,
        scale_y,
        regions,
    })
}

/// Pairs rendered pages with block sequences by position. Pages without a
/// loaded image or without block data are skipped.
pub fn layout_overlays(pages: &[RenderedPage], blocks: &[PageBlocks]) -> Vec<PageOverlay> {
    pages
        .iter()
        .enumerate()
        .filter_map(|(index, page)| {
            let size = page.size?;
            let page_blocks = blocks.get(index)?;
            layout_page(index as u32 + 1, size, &page_blocks.blocks)
        })
        .collect()
}
