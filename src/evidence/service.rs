use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::warn;

use crate::classifier::model::UploadFile;
use crate::evidence::model::Evidence;

/// Images above this byte size get re-encoded before upload.
pub const COMPRESSION_THRESHOLD: u64 = 3 * 1024 * 1024;
pub const MAX_WIDTH: u32 = 1920;
pub const MAX_HEIGHT: u32 = 1080;
pub const JPEG_QUALITY: u8 = 85;

pub fn content_type_for(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("txt") | Some("log") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

pub fn is_image(filename: &str) -> bool {
    matches!(
        extension(filename).as_deref(),
        Some("png" | "jpg" | "jpeg" | "gif" | "webp")
    )
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit('.')
        .next()
        .filter(|ext| *ext != filename)
        .map(|ext| ext.to_ascii_lowercase())
}

/// Encodes one selected file into an Evidence. Oversized images are
/// downscaled and re-encoded as JPEG; everything else (and any file whose
/// compression fails) is carried through byte-for-byte.
pub fn encode(file: &UploadFile) -> Evidence {
    if is_image(&file.name) && file.size > COMPRESSION_THRESHOLD {
        match compress_image(&file.content) {
            Ok(jpeg) => {
                return Evidence {
                    data: STANDARD.encode(&jpeg),
                    filename: file.name.clone(),
                    content_type: "image/jpeg".to_string(),
                };
            }
            Err(error) => {
                warn!("compression failed for {}, keeping original bytes: {}", file.name, error);
            }
        }
    }
    Evidence {
        data: STANDARD.encode(&file.content),
        filename: file.name.clone(),
        content_type: content_type_for(&file.name).to_string(),
    }
}

/// Decode, fit within 1920x1080 (downscale only), re-encode as JPEG.
pub fn compress_image(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = if decoded.width() > MAX_WIDTH || decoded.height() > MAX_HEIGHT {
        decoded.resize(MAX_WIDTH, MAX_HEIGHT, FilterType::Lanczos3)
    } else {
        decoded
    };
    let rgb = resized.to_rgb8();
    let mut output = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(output.into_inner())
}
