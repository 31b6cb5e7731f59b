//! Content-addressed artwork store
//!
//! Cover images are written once per distinct content under
//! `{images_dir}/{md5}.{ext}` and registered in the `images` table. Repeated
//! artwork (every track of an album, usually) resolves to the existing record
//! without touching the disk.

use crate::core::error::{CadenceError, Result};
use crate::core::prober::mime::sniff;
use crate::core::utils::hash_bytes;
use crate::db::models::Image;
use crate::db::repository::{ImageRepository, Repository};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct CoverStore {
    images_dir: PathBuf,
    link_prefix: String,
    image_repo: Arc<ImageRepository>,
}

impl CoverStore {
    pub fn new(images_dir: PathBuf, link_prefix: &str, image_repo: Arc<ImageRepository>) -> Self {
        Self {
            images_dir,
            link_prefix: link_prefix.trim_end_matches('/').to_string(),
            image_repo,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Store `bytes` unless identical content is already known, returning the
    /// image record either way.
    ///
    /// Not safe against two concurrent callers storing the same new content;
    /// the scanner is the only writer.
    pub async fn store(&self, bytes: &[u8]) -> Result<Image> {
        let mime = sniff(bytes);
        let extension = image_extension(mime).ok_or_else(|| {
            CadenceError::AssetWriteError(format!("cover is not a supported image ({})", mime))
        })?;

        let hash = hash_bytes(bytes);
        if let Some(existing) = self.image_repo.find_by_hash(&hash).await? {
            debug!(hash = %hash, "Cover already stored");
            return Ok(existing);
        }

        let file_name = format!("{}.{}", hash, extension);
        let path = self.images_dir.join(&file_name);
        write_atomically(&path, bytes).await?;

        let image = Image {
            id: Uuid::new_v4().to_string(),
            hash,
            path: path.to_string_lossy().into_owned(),
            link: format!("{}/{}", self.link_prefix, file_name),
            mime: mime.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.image_repo.create(&image).await?;

        debug!(path = ?path, mime = %image.mime, "Stored new cover");
        Ok(image)
    }
}

fn image_extension(mime: &str) -> Option<&'static str> {
    if !mime.starts_with("image/") {
        return None;
    }
    ImageFormat::from_mime_type(mime)?.extensions_str().first().copied()
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let asset_error =
        |e: std::io::Error| CadenceError::AssetWriteError(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(asset_error)?;
    }

    let tmp = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(asset_error(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(asset_error(e));
    }
    Ok(())
}
