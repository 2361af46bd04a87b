//! Flat directory of saved face images.

use crate::StoreError;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};
use std::fs::OpenOptions;
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone)]
pub struct ImageDir {
    root: PathBuf,
}

impl ImageDir {
    /// Use `root` as the image directory, creating it if missing.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save `image` as JPEG named `<name_key>_<unix_seconds>.jpg`.
    ///
    /// Never overwrites: if the name is taken, `_1`, `_2`, ... is appended
    /// before the extension.
    pub fn save_jpeg(
        &self,
        name_key: &str,
        image: &DynamicImage,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;

        let stamp = at.timestamp();
        let mut attempt = 0u32;
        loop {
            let file_name = match attempt {
                0 => format!("{name_key}_{stamp}.jpg"),
                n => format!("{name_key}_{stamp}_{n}.jpg"),
            };
            let path = self.root.join(file_name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(&encoded) {
                        drop(file);
                        let _ = std::fs::remove_file(&path);
                        return Err(e.into());
                    }
                    tracing::debug!(path = %path.display(), bytes = encoded.len(), "face image saved");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn remove(&self, path: &Path) -> Result<(), StoreError> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Image files (jpg, jpeg, png; any case) directly under the root, sorted
    /// by file name.
    pub fn face_images(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}
