//! Deep Zoom Image (DZI) geometry and descriptor.
//!
//! # DZI Format Overview
//!
//! Deep Zoom numbers levels from the smallest image upward:
//! - level 0 = 1x1 pixel
//! - max level = full resolution, where `max = ceil(log2(max(width, height)))`
//!
//! Each level halves the previous one (rounding up) and is cut into square
//! tiles of `tile_size` pixels. Tiles overlap their neighbours by `overlap`
//! pixels on every interior edge, so an interior tile is
//! `tile_size + 2 * overlap` pixels wide while tiles on the image border are
//! narrower.

/// Deep Zoom XML namespace.
pub const DZI_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

/// Render a `.dzi` descriptor. A 1030x600 upload produces:
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
///        TileSize="256"
///        Overlap="2"
///        Format="jpeg">
///   <Size Width="1030" Height="600" />
/// </Image>
/// ```
pub fn generate_dzi_xml(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    format: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="{DZI_NAMESPACE}"
       TileSize="{tile_size}"
       Overlap="{overlap}"
       Format="{format}">
  <Size Width="{width}" Height="{height}" />
</Image>
"#
    )
}

/// Index of the full-resolution level, `ceil(log2(max(width, height)))`.
pub fn calculate_max_dzi_level(width: u32, height: u32) -> usize {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    // ceil(log2(n)) for n >= 2 without going through floating point
    (u32::BITS - (max_dim - 1).leading_zeros()) as usize
}

/// Number of levels in the pyramid, `max_level + 1`.
pub fn dzi_level_count(width: u32, height: u32) -> usize {
    calculate_max_dzi_level(width, height) + 1
}

/// Size of level `dzi_level`: the full size divided by
/// `2^(max_dzi_level - dzi_level)`, rounded up. Out-of-range levels are `(0, 0)`.
pub fn dzi_level_dimensions(
    width: u32,
    height: u32,
    dzi_level: usize,
    max_dzi_level: usize,
) -> (u32, u32) {
    if dzi_level > max_dzi_level {
        return (0, 0);
    }

    let shift = (max_dzi_level - dzi_level) as u32;
    let scale = 1u64 << shift;
    let level_width = (width as u64).div_ceil(scale) as u32;
    let level_height = (height as u64).div_ceil(scale) as u32;

    (level_width.max(1), level_height.max(1))
}

/// Columns and rows of the tile grid for one level.
pub fn dzi_tile_count(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    let tiles_x = level_width.div_ceil(tile_size);
    let tiles_y = level_height.div_ceil(tile_size);
    (tiles_x.max(1), tiles_y.max(1))
}

/// Pixel rectangle `(x, y, width, height)` covered by tile `(col, row)` of a
/// level, overlap included.
pub fn tile_bounds(
    level_width: u32,
    level_height: u32,
    col: u32,
    row: u32,
    tile_size: u32,
    overlap: u32,
) -> (u32, u32, u32, u32) {
    let (x0, x1) = tile_span(level_width, col, tile_size, overlap);
    let (y0, y1) = tile_span(level_height, row, tile_size, overlap);
    (x0, y0, x1 - x0, y1 - y0)
}

fn tile_span(extent: u32, index: u32, tile_size: u32, overlap: u32) -> (u32, u32) {
    let start = index * tile_size;
    let lead = if index > 0 { overlap } else { 0 };
    let begin = start.saturating_sub(lead);
    let end = (start + tile_size + overlap).min(extent);
    (begin, end)
}

/// Parsed `.dzi` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
}

impl DziDescriptor {
    pub fn to_xml(&self) -> String {
        generate_dzi_xml(
            self.width,
            self.height,
            self.tile_size,
            self.overlap,
            &self.format,
        )
    }

    /// Number of levels the descriptor implies.
    pub fn level_count(&self) -> usize {
        dzi_level_count(self.width, self.height)
    }

    /// Read the attributes of a descriptor produced by [`generate_dzi_xml`]
    /// (or any DZI that uses the same attribute names).
    pub fn parse(xml: &str) -> Option<Self> {
        Some(Self {
            width: attribute(xml, "Width")?.parse().ok()?,
            height: attribute(xml, "Height")?.parse().ok()?,
            tile_size: attribute(xml, "TileSize")?.parse().ok()?,
            overlap: attribute(xml, "Overlap")?.parse().ok()?,
            format: attribute(xml, "Format")?.to_string(),
        })
    }
}

fn attribute<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let start = xml
        .find(&needle)
        .or_else(|| xml.find(&format!("\n{}=\"", name)))
        .or_else(|| xml.find(&format!("\t{}=\"", name)))?
        + needle.len();
    let end = xml[start..].find('"')? + start;
    Some(&xml[start..end])
}
