//! Tile transform capability.
//!
//! A [`TileTransform`] turns one source image file into the tile directories
//! of a Deep Zoom pyramid. The pyramid generator owns everything around it
//! (staging, descriptor, publication, cleanup), so a transform only has to
//! write `<files_dir>/<level>/<col>_<row>.<ext>` and report the source size.
//!
//! [`DeepZoomTransform`] is the built-in implementation on top of the `image`
//! crate. It decodes the full image once, then walks the levels from full
//! resolution down to 1x1, halving the previous level each step.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use tracing::debug;

use crate::error::TilingError;
use crate::upload::ImageExtension;

use super::dzi::{calculate_max_dzi_level, dzi_level_dimensions, dzi_tile_count, tile_bounds};

/// Tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Overlap between neighbouring tiles in pixels.
pub const DEFAULT_TILE_OVERLAP: u32 = 2;

/// JPEG quality of generated tiles (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// File extension (and DZI `Format`) of generated tiles.
pub const TILE_FORMAT: &str = "jpeg";

// =============================================================================
// Transform Contract
// =============================================================================

/// Fixed tiling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    pub tile_size: u32,
    pub overlap: u32,
    pub quality: u8,
}

impl Default for TileSpec {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_TILE_OVERLAP,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// What a transform reports back about the pyramid it wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidSummary {
    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Number of levels written (`max_level + 1`)
    pub levels: usize,

    /// Total number of tiles written
    pub tiles: u64,
}

/// Converts a source image into the tile tree of a Deep Zoom pyramid.
///
/// Implementations are synchronous and may be CPU heavy; callers run them on
/// the blocking thread pool.
pub trait TileTransform: Send + Sync {
    /// Tiling parameters the transform applies.
    fn spec(&self) -> TileSpec;

    /// Read `source` and write every tile under `files_dir`.
    ///
    /// `declared` is the extension the uploader claimed; implementations may
    /// use it as a hint but should trust the content.
    fn transform(
        &self,
        source: &Path,
        declared: ImageExtension,
        files_dir: &Path,
    ) -> Result<PyramidSummary, TilingError>;
}

// =============================================================================
// Deep Zoom Transform
// =============================================================================

/// Built-in Deep Zoom transform writing JPEG tiles.
#[derive(Debug, Clone, Default)]
pub struct DeepZoomTransform {
    spec: TileSpec,
}

impl DeepZoomTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(spec: TileSpec) -> Self {
        Self { spec }
    }

    fn decode(&self, source: &Path, declared: ImageExtension) -> Result<RgbImage, TilingError> {
        let file = File::open(source).map_err(|e| TilingError::io(source, e))?;
        let mut reader = ImageReader::new(BufReader::new(file));
        reader.set_format(declared.image_format());
        let mut reader = reader
            .with_guessed_format()
            .map_err(|e| TilingError::io(source, e))?;
        // No pixel-count ceiling: large scans are the point of this service.
        reader.no_limits();

        let image = reader
            .decode()
            .map_err(|e| TilingError::Decode(e.to_string()))?;
        Ok(image.into_rgb8())
    }

    fn write_level(
        &self,
        image: &RgbImage,
        level: usize,
        files_dir: &Path,
    ) -> Result<u64, TilingError> {
        let level_dir = files_dir.join(level.to_string());
        fs::create_dir_all(&level_dir).map_err(|e| TilingError::io(&level_dir, e))?;

        let (width, height) = image.dimensions();
        let TileSpec {
            tile_size,
            overlap,
            quality,
        } = self.spec;
        let (cols, rows) = dzi_tile_count(width, height, tile_size);

        for row in 0..rows {
            for col in 0..cols {
                let (x, y, w, h) = tile_bounds(width, height, col, row, tile_size, overlap);
                let tile = imageops::crop_imm(image, x, y, w, h).to_image();

                let path = level_dir.join(format!("{}_{}.{}", col, row, TILE_FORMAT));
                let file = File::create(&path).map_err(|e| TilingError::io(&path, e))?;
                let mut writer = BufWriter::new(file);
                JpegEncoder::new_with_quality(&mut writer, quality)
                    .encode_image(&tile)
                    .map_err(|e| TilingError::Encode(e.to_string()))?;
                writer.flush().map_err(|e| TilingError::io(&path, e))?;
            }
        }

        Ok(u64::from(cols) * u64::from(rows))
    }
}

impl TileTransform for DeepZoomTransform {
    fn spec(&self) -> TileSpec {
        self.spec
    }

    fn transform(
        &self,
        source: &Path,
        declared: ImageExtension,
        files_dir: &Path,
    ) -> Result<PyramidSummary, TilingError> {
        let mut current = self.decode(source, declared)?;
        let (width, height) = current.dimensions();
        if width == 0 || height == 0 {
            return Err(TilingError::EmptyImage { width, height });
        }

        let max_level = calculate_max_dzi_level(width, height);
        let mut tiles = 0;

        for level in (0..=max_level).rev() {
            let (level_width, level_height) =
                dzi_level_dimensions(width, height, level, max_level);
            if current.dimensions() != (level_width, level_height) {
                current = imageops::resize(&current, level_width, level_height, FilterType::Triangle);
            }
            tiles += self.write_level(&current, level, files_dir)?;
        }

        debug!(
            source = %source.display(),
            width,
            height,
            levels = max_level + 1,
            tiles,
            "pyramid written"
        );

        Ok(PyramidSummary {
            width,
            height,
            levels: max_level + 1,
            tiles,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
