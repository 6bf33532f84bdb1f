//! Loads an image from disk for the next turn.

use anyhow::Result;
use std::path::Path;
use wa_llm::ImageData;

pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub async fn load_image(path: &Path) -> Result<ImageData> {
    let Some(mime) = mime_for_path(path) else {
        return Err(anyhow::anyhow!(
            "unsupported image type {}; use jpg, png, webp or gif",
            path.display()
        ));
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("read image {}: {e}", path.display()))?;
    check_size(bytes.len())?;
    Ok(ImageData::new(mime, bytes)?)
}

pub fn check_size(len: usize) -> Result<()> {
    if len > MAX_IMAGE_BYTES {
        return Err(anyhow::anyhow!(
            "image is {len} bytes; the limit is {MAX_IMAGE_BYTES}"
        ));
    }
    Ok(())
}
