use snapgram_common::{
    media::{ImageNormalizer, NormalizeError, Upload},
    model::{
        Id,
        image::{ImageMarker, InvalidMediaRefError, MediaFolder, MediaRef},
    },
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::debug;

const MAX_STORED_NAME_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("Normalizing task failed: {0}")]
    Join(#[from] JoinError),
    #[error("Writing media failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reference(#[from] InvalidMediaRefError),
}

/// Uploaded files below a local media root, which is also served under `/media/`.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct MediaStore {
    root: PathBuf,
    normalizer: ImageNormalizer,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: PathBuf, normalizer: ImageNormalizer) -> Self {
        Self { root, normalizer }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalizes `upload` and writes it to `<root>/<folder>/<id>-<file name>`.
    pub async fn store(
        &self,
        folder: MediaFolder,
        id: Id<ImageMarker>,
        upload: Upload,
    ) -> Result<MediaRef, MediaError> {
        let normalizer = self.normalizer;
        let upload = tokio::task::spawn_blocking(move || normalizer.normalize(upload)).await??;

        let media = MediaRef::new(format!(
            "{folder}/{id}-{}",
            stored_file_name(&upload.file_name)
        ))?;

        tokio::fs::create_dir_all(self.root.join(folder.as_str())).await?;
        tokio::fs::write(self.root.join(media.get()), &upload.bytes).await?;

        debug!(media = media.get(), size = upload.len(), "Stored upload");
        Ok(media)
    }
}

/// Last path component of a client supplied name, restricted to `[A-Za-z0-9._-]`.
fn stored_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STORED_NAME_LEN)
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use crate::server::media::{MediaStore, stored_file_name};
    use snapgram_common::{
        media::{ImageNormalizer, NormalizerConfig, Upload},
        model::{Id, image::MediaFolder},
    };

    #[test]
    fn file_names_are_cleaned() {
        assert_eq!(stored_file_name("holiday.jpg"), "holiday.jpg");
        assert_eq!(stored_file_name("../../etc/passwd"), "passwd");
        assert_eq!(stored_file_name("C:\\photos\\me at sea.png"), "me_at_sea.png");
        assert_eq!(stored_file_name(".."), "upload");
        assert_eq!(stored_file_name(""), "upload");
        assert_eq!(stored_file_name(&"a".repeat(300)).len(), 100);
    }

    #[tokio::test]
    async fn stores_small_uploads_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let store = MediaStore::new(
            root.path().to_owned(),
            ImageNormalizer::new(NormalizerConfig::default()),
        );
        let upload = Upload {
            file_name: "notes.jpg".to_owned(),
            content_type: Some("image/jpeg".to_owned()),
            bytes: b"not decoded when small".to_vec(),
        };

        let media = store
            .store(MediaFolder::PostImage, Id::from(42), upload.clone())
            .await
            .unwrap();

        assert_eq!(media.get(), "post_image/42-notes.jpg");
        let written = tokio::fs::read(root.path().join(media.get())).await.unwrap();
        assert_eq!(written, upload.bytes);
    }
}
