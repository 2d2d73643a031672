//! Format gate for uploaded filenames.
//!
//! The gate only looks at the declared extension. It does not sniff content:
//! a `.png` that is really a JPEG passes here and is decoded by content later,
//! while a file that is not an image at all fails at tiling time.

use crate::error::IngestError;

/// Extensions accepted for tiling, lowercase and without the leading dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// A declared image extension from the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
    Tif,
    Tiff,
    Bmp,
}

impl ImageExtension {
    /// Match an extension (without dot), case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" => Some(ImageExtension::Jpg),
            "jpeg" => Some(ImageExtension::Jpeg),
            "png" => Some(ImageExtension::Png),
            "tif" => Some(ImageExtension::Tif),
            "tiff" => Some(ImageExtension::Tiff),
            "bmp" => Some(ImageExtension::Bmp),
            _ => None,
        }
    }

    /// Lowercase extension without the dot.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageExtension::Jpg => "jpg",
            ImageExtension::Jpeg => "jpeg",
            ImageExtension::Png => "png",
            ImageExtension::Tif => "tif",
            ImageExtension::Tiff => "tiff",
            ImageExtension::Bmp => "bmp",
        }
    }

    /// Decoder format implied by the extension.
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            ImageExtension::Jpg | ImageExtension::Jpeg => image::ImageFormat::Jpeg,
            ImageExtension::Png => image::ImageFormat::Png,
            ImageExtension::Tif | ImageExtension::Tiff => image::ImageFormat::Tiff,
            ImageExtension::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// A filename that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    /// Filename exactly as the client declared it
    pub original: String,

    /// Filename without directories and extension, used to name the output
    pub base_name: String,

    pub extension: ImageExtension,
}

/// Check a declared filename against the allow-list.
///
/// Directory components (either separator style) are dropped first, so
/// `C:\scans\M31.TIF` validates as base name `M31` with extension `tif`.
pub fn validate(filename: &str) -> Result<ValidatedFile, IngestError> {
    let rejected = || IngestError::UnsupportedFormat {
        filename: filename.to_string(),
    };

    let file = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    // A leading dot marks a hidden file, not an extension (".png" has none).
    let (stem, ext) = match file.rfind('.') {
        Some(pos) if pos > 0 => (&file[..pos], &file[pos + 1..]),
        _ => return Err(rejected()),
    };

    let extension = ImageExtension::from_extension(ext).ok_or_else(rejected)?;

    if stem.is_empty() || stem == "." || stem.contains('\0') {
        return Err(rejected());
    }

    Ok(ValidatedFile {
        original: filename.to_string(),
        base_name: stem.to_string(),
        extension,
    })
}

/// Whether a filename would pass [`validate`].
pub fn is_supported(filename: &str) -> bool {
    validate(filename).is_ok()
}
