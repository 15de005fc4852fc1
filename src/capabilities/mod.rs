//! The outside systems a capture screen depends on.
//!
//! Each capability is a trait so that the [`crate::screen`] event loop can be
//! driven by real implementations from the command line, and by test doubles
//! in unit tests.

use std::{error, fmt, io};

use schemars::JsonSchema;
use uuid::Uuid;

use crate::{prelude::*, session::CameraSettings};

pub mod camera;
pub mod media_store;
pub mod permissions;

/// Which permissions we hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Grants {
    /// May we use the camera?
    pub camera: bool,

    /// May we save to the media library?
    pub storage: bool,
}

impl Grants {
    /// Every permission granted.
    pub fn all() -> Self {
        Self {
            camera: true,
            storage: true,
        }
    }

    /// No permissions granted.
    #[cfg(test)]
    pub fn none() -> Self {
        Self::default()
    }

    /// Do we hold everything we need to capture and save?
    pub fn all_granted(&self) -> bool {
        self.camera && self.storage
    }
}

/// Source of camera and storage permissions.
#[async_trait]
pub trait PermissionGate: fmt::Debug + Send + Sync + 'static {
    /// What do we hold right now? Never prompts.
    async fn check(&self) -> Result<Grants>;

    /// Ask for anything we don't hold. This may wait on the user.
    async fn request(&self) -> Result<Grants>;
}

/// A captured image waiting for review. The file it points at is temporary
/// and owned by the camera that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    id: Uuid,
    path: PathBuf,
}

impl ImageRef {
    /// Create a reference to a freshly captured image.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
        }
    }

    /// A unique ID for this capture.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the image data lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the image data.
    pub async fn read(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("cannot read captured image {:?}", self.path))
    }
}

/// A reference to a durably stored image, as returned by a [`MediaStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct PersistedRef(String);

impl PersistedRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why the camera couldn't give us a picture.
#[derive(Debug)]
pub enum CaptureFailure {
    /// The camera has nothing to show.
    NoFrames,

    /// The camera returned an empty image.
    NoData,

    /// Reading or writing image data failed.
    Io(io::Error),

    /// Image data couldn't be processed.
    Image(image::ImageError),
}

impl fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFailure::NoFrames => write!(f, "camera has no frames available"),
            CaptureFailure::NoData => write!(f, "camera returned no image data"),
            CaptureFailure::Io(err) => write!(f, "camera I/O error: {err}"),
            CaptureFailure::Image(err) => write!(f, "camera image error: {err}"),
        }
    }
}

impl error::Error for CaptureFailure {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CaptureFailure::NoFrames | CaptureFailure::NoData => None,
            CaptureFailure::Io(err) => Some(err),
            CaptureFailure::Image(err) => Some(err),
        }
    }
}

impl From<io::Error> for CaptureFailure {
    fn from(err: io::Error) -> Self {
        CaptureFailure::Io(err)
    }
}

impl From<image::ImageError> for CaptureFailure {
    fn from(err: image::ImageError) -> Self {
        CaptureFailure::Image(err)
    }
}

/// A camera.
#[async_trait]
pub trait Camera: fmt::Debug + Send + Sync + 'static {
    /// Take one picture using `settings`.
    async fn request_frame(
        &self,
        settings: &CameraSettings,
    ) -> Result<ImageRef, CaptureFailure>;
}

/// Durable storage for photos the user decided to keep.
#[async_trait]
pub trait MediaStore: fmt::Debug + Send + Sync + 'static {
    /// Store `image`, returning a reference to the stored copy.
    async fn persist(&self, image: &ImageRef) -> Result<PersistedRef>;
}
