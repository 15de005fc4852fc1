//! A media library in a local directory.

use uuid::Uuid;

use crate::prelude::*;

use super::{ImageRef, MediaStore, PersistedRef};

/// Saves photos into a library directory, creating it if needed.
#[derive(Debug)]
pub struct DirectoryMediaStore {
    library: PathBuf,
}

impl DirectoryMediaStore {
    /// Create a store which saves into `library`.
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: library.into(),
        }
    }
}

#[async_trait]
impl MediaStore for DirectoryMediaStore {
    #[instrument(level = "debug", skip_all, fields(image = %image.id()))]
    async fn persist(&self, image: &ImageRef) -> Result<PersistedRef> {
        tokio::fs::create_dir_all(&self.library)
            .await
            .with_context(|| format!("cannot create media library {:?}", self.library))?;

        let extension = image
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("jpg");
        let dest = self
            .library
            .join(format!("IMG_{}.{}", Uuid::new_v4().simple(), extension));
        tokio::fs::copy(image.path(), &dest)
            .await
            .with_context(|| format!("cannot save photo to {:?}", dest))?;

        let dest = tokio::fs::canonicalize(&dest).await.unwrap_or(dest);
        info!(path = %dest.display(), "Photo saved");
        Ok(PersistedRef::new(dest.to_string_lossy()))
    }
}
