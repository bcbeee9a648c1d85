//! ImageStore: durable on-disk storage for entry payloads.
//!
//! Payloads are sharded beneath `root/{shard}/{shard}/{file}` where the shards
//! come from the MD5 of the owning entry id. Writes stream into a temporary
//! file, are fsynced, validated as images, and only then renamed into place,
//! so a half-written or corrupt upload never becomes visible.

use crate::errors::{CatalogError, CatalogResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use image::{ImageFormat, ImageReader, imageops::FilterType};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    task,
};
use tracing::debug;
use uuid::Uuid;

/// Longest side, in pixels, of the copy kept once the client has the original.
pub const THUMBNAIL_MAX_SIDE: u32 = 128;

/// A payload that has been durably written and validated.
#[derive(Debug, Clone)]
pub struct StoredImage {
    /// Path relative to the store root.
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// A resized copy written beside its original but not yet swapped in.
///
/// Pass it to [`ImageStore::finish_resize`] once the change that called for
/// it is durable, or to [`ImageStore::discard_resize`] otherwise.
#[derive(Debug)]
pub struct PendingResize {
    /// `None` when the original already fits.
    staged: Option<PathBuf>,
    target: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two-level shard identifiers for an entry, from the first two bytes of
    /// MD5(entry id) as lowercase hex.
    fn shards(entry_id: Uuid) -> (String, String) {
        let digest = md5::compute(entry_id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Resolve a stored relative path, rejecting anything that escapes the root.
    pub fn absolute(&self, relative: &str) -> CatalogResult<PathBuf> {
        if relative.is_empty()
            || relative.starts_with('/')
            || relative.contains("..")
            || relative.contains('\\')
        {
            return Err(CatalogError::validation("invalid image path"));
        }
        Ok(self.root.join(relative))
    }

    /// Stream a payload to disk for `entry_id`.
    ///
    /// - Writes bytes incrementally to a temporary file and fsyncs it.
    /// - Decodes the file: it must be a recognizable, complete image.
    /// - Renames it into its sharded location, named after the detected format.
    ///
    /// Temp files are removed on every error path.
    pub async fn store_stream<S>(&self, entry_id: Uuid, stream: S) -> CatalogResult<StoredImage>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let (shard_a, shard_b) = Self::shards(entry_id);
        let parent = self.root.join(&shard_a).join(&shard_b);
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(CatalogError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(CatalogError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CatalogError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CatalogError::Io(err));
        }
        drop(file);

        if size_bytes == 0 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CatalogError::validation("empty upload"));
        }

        let (format, width, height) = match inspect(tmp_path.clone()).await {
            Ok(inspected) => inspected,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let file_name = format!("{}-{}.{}", entry_id, Uuid::new_v4().simple(), extension);
        let final_path = parent.join(&file_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CatalogError::Io(err));
        }

        debug!(
            "stored {} bytes for entry {} at {}",
            size_bytes,
            entry_id,
            final_path.display()
        );

        Ok(StoredImage {
            path: format!("{}/{}/{}", shard_a, shard_b, file_name),
            width,
            height,
        })
    }

    /// Open a stored payload for streaming out.
    pub async fn open(&self, relative: &str) -> CatalogResult<File> {
        Ok(File::open(self.absolute(relative)?).await?)
    }

    /// Write a copy of a stored image whose longest side is at most
    /// `max_side`. The original stays untouched until the copy is finished.
    pub async fn prepare_shrink(
        &self,
        relative: &str,
        max_side: u32,
    ) -> CatalogResult<PendingResize> {
        let path = self.absolute(relative)?;
        task::spawn_blocking(move || resize_beside(path, max_side))
            .await
            .map_err(|err| CatalogError::Io(io::Error::other(err)))?
    }

    /// Replace the original with its prepared copy. Returns the final dimensions.
    pub async fn finish_resize(&self, pending: PendingResize) -> CatalogResult<(u32, u32)> {
        if let Some(staged) = &pending.staged {
            if let Err(err) = fs::rename(staged, &pending.target).await {
                let _ = fs::remove_file(staged).await;
                return Err(err.into());
            }
            debug!(
                "resized {} to {}x{}",
                pending.target.display(),
                pending.width,
                pending.height
            );
        }
        Ok((pending.width, pending.height))
    }

    /// Drop a prepared copy, keeping the original.
    pub async fn discard_resize(&self, pending: PendingResize) {
        if let Some(staged) = pending.staged {
            let _ = fs::remove_file(&staged).await;
        }
    }

    /// Remove a payload, best-effort, pruning emptied shard directories.
    pub async fn remove(&self, relative: &str) {
        let Ok(path) = self.absolute(relative) else {
            return;
        };
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed image file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("image file {} already missing", path.display());
            }
            Err(err) => {
                debug!("failed to remove image file {}: {}", path.display(), err);
                return;
            }
        }
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
    }

    /// Recursively remove empty directories up to the store root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Dimensions of an image scaled down to fit a `max_side` square, aspect
/// ratio preserved. Images already within bounds keep their size.
pub fn thumbnail_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }
    let scale = |side: u32| -> u32 {
        let scaled = (u64::from(side) * u64::from(max_side) + u64::from(longest) / 2)
            / u64::from(longest);
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_side, scale(height))
    } else {
        (scale(width), max_side)
    }
}

async fn inspect(path: PathBuf) -> CatalogResult<(ImageFormat, u32, u32)> {
    task::spawn_blocking(move || -> CatalogResult<(ImageFormat, u32, u32)> {
        let reader = ImageReader::open(&path)?.with_guessed_format()?;
        let format = reader
            .format()
            .ok_or_else(|| CatalogError::validation("unrecognized image format"))?;
        // a readable header is not enough: truncated bodies only fail on decode
        let img = reader.decode()?;
        Ok((format, img.width(), img.height()))
    })
    .await
    .map_err(|err| CatalogError::Io(io::Error::other(err)))?
}

fn resize_beside(path: PathBuf, max_side: u32) -> CatalogResult<PendingResize> {
    let reader = ImageReader::open(&path)?.with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| CatalogError::validation("unrecognized image format"))?;
    let img = reader.decode()?;

    let (width, height) = thumbnail_dimensions(img.width(), img.height(), max_side);
    if (width, height) == (img.width(), img.height()) {
        return Ok(PendingResize {
            staged: None,
            target: path,
            width,
            height,
        });
    }

    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    let tmp_path = path.with_file_name(format!(".tmp-{}", Uuid::new_v4()));
    if let Err(err) = resized.save_with_format(&tmp_path, format) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    if let Err(err) = std::fs::File::open(&tmp_path).and_then(|f| f.sync_all()) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(PendingResize {
        staged: Some(tmp_path),
        target: path,
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    pub(crate) fn one_chunk(bytes: Bytes) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(vec![Ok(bytes)])
    }

    #[test]
    fn thumbnail_dimensions_keep_aspect_ratio() {
        assert_eq!(thumbnail_dimensions(400, 200, 128), (128, 64));
        assert_eq!(thumbnail_dimensions(200, 400, 128), (64, 128));
        assert_eq!(thumbnail_dimensions(128, 128, 128), (128, 128));
        assert_eq!(thumbnail_dimensions(100, 20, 128), (100, 20));
        assert_eq!(thumbnail_dimensions(5000, 1, 128), (128, 1));
    }

    #[tokio::test]
    async fn store_then_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let id = Uuid::new_v4();

        let stored = store
            .store_stream(id, one_chunk(png_bytes(400, 200)))
            .await
            .unwrap();
        assert_eq!((stored.width, stored.height), (400, 200));
        assert!(stored.path.ends_with(".png"));

        let pending = store
            .prepare_shrink(&stored.path, THUMBNAIL_MAX_SIDE)
            .await
            .unwrap();
        let dims = store.finish_resize(pending).await.unwrap();
        assert_eq!(dims, (128, 64));
        let on_disk = image::open(store.absolute(&stored.path).unwrap()).unwrap();
        assert_eq!((on_disk.width(), on_disk.height()), (128, 64));
    }

    #[tokio::test]
    async fn corrupt_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let id = Uuid::new_v4();

        let err = store
            .store_stream(id, one_chunk(Bytes::from_static(b"definitely not an image")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(_) | CatalogError::Image(_)
        ));

        let (a, b) = ImageStore::shards(id);
        let mut leftovers = std::fs::read_dir(dir.path().join(a).join(b)).unwrap();
        assert!(leftovers.next().is_none());
    }

    #[tokio::test]
    async fn truncated_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let id = Uuid::new_v4();

        // signature and IHDR survive, pixel data does not
        let truncated = png_bytes(400, 200).slice(0..60);
        let err = store
            .store_stream(id, one_chunk(truncated))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Image(_)), "{err:?}");

        let (a, b) = ImageStore::shards(id);
        let mut leftovers = std::fs::read_dir(dir.path().join(a).join(b)).unwrap();
        assert!(leftovers.next().is_none());
    }

    #[tokio::test]
    async fn prepared_resize_keeps_original_until_finished() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let stored = store
            .store_stream(Uuid::new_v4(), one_chunk(png_bytes(400, 200)))
            .await
            .unwrap();
        let original = store.absolute(&stored.path).unwrap();
        let shard_dir = original.parent().unwrap().to_path_buf();
        let files = || std::fs::read_dir(&shard_dir).unwrap().count();
        let dims = || {
            let img = image::open(&original).unwrap();
            (img.width(), img.height())
        };

        let pending = store
            .prepare_shrink(&stored.path, THUMBNAIL_MAX_SIDE)
            .await
            .unwrap();
        assert_eq!((pending.width, pending.height), (128, 64));
        assert_eq!(dims(), (400, 200));
        assert_eq!(files(), 2);

        store.discard_resize(pending).await;
        assert_eq!(dims(), (400, 200));
        assert_eq!(files(), 1);

        let pending = store
            .prepare_shrink(&stored.path, THUMBNAIL_MAX_SIDE)
            .await
            .unwrap();
        assert_eq!(store.finish_resize(pending).await.unwrap(), (128, 64));
        assert_eq!(dims(), (128, 64));
        assert_eq!(files(), 1);

        // already within bounds: nothing staged
        let pending = store
            .prepare_shrink(&stored.path, THUMBNAIL_MAX_SIDE)
            .await
            .unwrap();
        assert_eq!(files(), 1);
        assert_eq!(store.finish_resize(pending).await.unwrap(), (128, 64));
    }

    #[tokio::test]
    async fn remove_prunes_shard_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let stored = store
            .store_stream(Uuid::new_v4(), one_chunk(png_bytes(10, 10)))
            .await
            .unwrap();

        store.remove(&stored.path).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn absolute_rejects_traversal() {
        let store = ImageStore::new("/srv/media");
        assert!(store.absolute("../etc/passwd").is_err());
        assert!(store.absolute("/etc/passwd").is_err());
        assert!(store.absolute("ab/cd/x.png").is_ok());
    }
}
