use crate::rules::{arguments_match, ImageParserRule};
use std::path::{Path, PathBuf};

/// File name the cropped comparison image is written to in the install dir.
pub const IQC_IMAGE_NAME: &str = "iqc.png";

/// Rectangle to crop out of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Errors produced by an image codec.
#[derive(Debug)]
pub enum ImageError {
    Io(std::io::Error),
    Decode(String),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Io(e) => write!(f, "I/O error: {e}"),
            ImageError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Io(e) => Some(e),
            ImageError::Decode(_) => None,
        }
    }
}

impl From<std::io::Error> for ImageError {
    fn from(e: std::io::Error) -> Self {
        ImageError::Io(e)
    }
}

/// Decode/crop/encode primitives supplied by the host.
pub trait ImageCodec: Send + Sync {
    /// Crop `region` out of `source` and write it as a PNG to `dest`.
    fn crop_to_png(&self, source: &Path, region: CropRegion, dest: &Path)
        -> Result<(), ImageError>;
}

/// Evaluate image parser entries in order and return the path of the cropped
/// comparison image.
///
/// Entries whose argument filter does not match, or whose source image does
/// not exist under `install_dir`, are skipped. A codec failure ends the scan.
pub fn parse_image_result(
    entries: &[ImageParserRule],
    codec: &dyn ImageCodec,
    install_dir: &Path,
    arguments: &str,
) -> Option<PathBuf> {
    for entry in entries {
        if !arguments_match(entry.match_arguments.as_deref(), arguments) {
            continue;
        }
        let Some(source) = entry.source_image.as_deref().map(|s| install_dir.join(s)) else {
            continue;
        };
        if !source.is_file() {
            tracing::debug!(source = %source.display(), "image parser source missing, trying next");
            continue;
        }

        let region = CropRegion {
            x: entry.image_x,
            y: entry.image_y,
            width: entry.image_width,
            height: entry.image_height,
        };
        let dest = install_dir.join(IQC_IMAGE_NAME);
        return match codec.crop_to_png(&source, region, &dest) {
            Ok(()) => Some(dest),
            Err(e) => {
                tracing::warn!(error = %e, source = %source.display(), "failed to crop comparison image");
                None
            }
        };
    }
    None
}
