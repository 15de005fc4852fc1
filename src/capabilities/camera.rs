//! A camera backed by image files on disk.

use std::{
    io::Cursor,
    sync::atomic::{AtomicUsize, Ordering},
};

use image::{ImageFormat, imageops::FilterType};
use tempfile::TempDir;
use uuid::Uuid;

use crate::{
    prelude::*,
    session::{CameraSettings, Facing},
};

use super::{Camera, CaptureFailure, ImageRef};

/// Quality used when re-encoding frames.
const JPEG_QUALITY: u8 = 90;

/// A "camera" which returns the images in a directory, one per capture,
/// cycling back to the first after the last.
///
/// If the directory has a `front` or `back` subdirectory, captures with the
/// matching [`Facing`] come from there instead. Zoom is applied as a centered
/// crop, scaled back up to the original size. Flash and torch settings are
/// accepted but have no visible effect.
#[derive(Debug)]
pub struct DirectoryCamera {
    /// Where our frames come from.
    root: PathBuf,

    /// How many pictures we've taken.
    shots: AtomicUsize,

    /// Scratch space for captured images. Removed when the camera is dropped.
    scratch: TempDir,
}

impl DirectoryCamera {
    /// Create a camera reading frames from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(anyhow!("camera directory {:?} does not exist", root));
        }
        let scratch = TempDir::with_prefix("snapscribe")
            .context("cannot create scratch directory for captures")?;
        Ok(Self {
            root,
            shots: AtomicUsize::new(0),
            scratch,
        })
    }

    /// Where do frames for `facing` come from?
    fn source_dir(&self, facing: Facing) -> PathBuf {
        let dir = self.root.join(facing.to_string());
        if dir.is_dir() { dir } else { self.root.clone() }
    }

    /// List the image files available as frames, in a stable order. Only
    /// formats we can decode count.
    async fn frames(&self, facing: Facing) -> Result<Vec<PathBuf>, CaptureFailure> {
        let mut entries = tokio::fs::read_dir(self.source_dir(facing)).await?;
        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = mime_guess::from_path(&path).first().is_some_and(|mime| {
                mime == mime_guess::mime::IMAGE_JPEG || mime == mime_guess::mime::IMAGE_PNG
            });
            if is_image && entry.file_type().await?.is_file() {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }
}

#[async_trait]
impl Camera for DirectoryCamera {
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            zoom = settings.zoom,
            facing = %settings.facing,
            flash = %settings.flash,
            torch = settings.torch,
        )
    )]
    async fn request_frame(
        &self,
        settings: &CameraSettings,
    ) -> Result<ImageRef, CaptureFailure> {
        let frames = self.frames(settings.facing).await?;
        if frames.is_empty() {
            return Err(CaptureFailure::NoFrames);
        }
        let shot = self.shots.fetch_add(1, Ordering::Relaxed);
        let source = &frames[shot % frames.len()];
        debug!(?source, "Taking picture");

        let mut data = tokio::fs::read(source).await?;
        if data.is_empty() {
            return Err(CaptureFailure::NoData);
        }
        // Recognition uploads JPEG, so other known formats get converted.
        let other_format =
            matches!(image::guess_format(&data), Ok(format) if format != ImageFormat::Jpeg);
        if settings.zoom > 0.0 || other_format {
            data = zoom_jpeg(&data, settings.zoom)?;
        }

        let path = self.scratch.path().join(format!("{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, &data).await?;
        Ok(ImageRef::new(path))
    }
}

/// Crop the center `1 / (1 + zoom)` of an image, resize it back to the
/// original dimensions, and encode it as JPEG. A zoom of 0 only re-encodes.
fn zoom_jpeg(data: &[u8], zoom: f32) -> Result<Vec<u8>, CaptureFailure> {
    let img = image::load_from_memory(data)?;
    let (width, height) = (img.width(), img.height());
    let scale = 1.0 / (1.0 + f64::from(zoom));
    let crop_w = ((f64::from(width) * scale).round() as u32).max(1);
    let crop_h = ((f64::from(height) * scale).round() as u32).max(1);
    let x = (width - crop_w) / 2;
    let y = (height - crop_h) / 2;
    let zoomed = img
        .crop_imm(x, y, crop_w, crop_h)
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let mut out = Cursor::new(Vec::new());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    zoomed.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a solid-color frame.
    fn test_frame(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_cycles_through_frames() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"first").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a frame").unwrap();

        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings::default();
        let mut seen = vec![];
        for _ in 0..3 {
            let image = camera.request_frame(&settings).await.unwrap();
            seen.push(image.read().await.unwrap());
        }
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec(), b"first".to_vec()]);
    }

    #[tokio::test]
    async fn test_each_capture_is_a_new_image() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"same").unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings::default();
        let first = camera.request_frame(&settings).await.unwrap();
        let second = camera.request_frame(&settings).await.unwrap();
        assert_ne!(first, second);
        assert_ne!(first.path(), second.path());
    }

    #[tokio::test]
    async fn test_facing_selects_subdirectory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.jpg"), b"back").unwrap();
        std::fs::create_dir(dir.path().join("front")).unwrap();
        std::fs::write(dir.path().join("front/selfie.jpg"), b"front").unwrap();

        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings {
            facing: Facing::Front,
            ..CameraSettings::default()
        };
        let image = camera.request_frame(&settings).await.unwrap();
        assert_eq!(image.read().await.unwrap(), b"front");

        let image = camera
            .request_frame(&CameraSettings::default())
            .await
            .unwrap();
        assert_eq!(image.read().await.unwrap(), b"back");
    }

    #[tokio::test]
    async fn test_capture_failures() {
        let dir = TempDir::new().unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings::default();
        assert!(matches!(
            camera.request_frame(&settings).await,
            Err(CaptureFailure::NoFrames)
        ));

        std::fs::write(dir.path().join("empty.jpg"), b"").unwrap();
        assert!(matches!(
            camera.request_frame(&settings).await,
            Err(CaptureFailure::NoData)
        ));
    }

    #[tokio::test]
    async fn test_zoom_keeps_dimensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("frame.png"),
            test_frame(64, 48, ImageFormat::Png),
        )
        .unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings {
            zoom: 1.0,
            ..CameraSettings::default()
        };
        let image = camera.request_frame(&settings).await.unwrap();
        let data = image.read().await.unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Jpeg);
        let zoomed = image::load_from_memory(&data).unwrap();
        assert_eq!((zoomed.width(), zoomed.height()), (64, 48));
    }

    #[tokio::test]
    async fn test_undecodable_formats_are_not_frames() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("photo.heic"), b"heic bytes").unwrap();
        std::fs::write(dir.path().join("scan.tiff"), b"tiff bytes").unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        assert!(matches!(
            camera.request_frame(&CameraSettings::default()).await,
            Err(CaptureFailure::NoFrames)
        ));
    }

    #[tokio::test]
    async fn test_png_frames_become_jpeg() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("frame.png"),
            test_frame(8, 8, ImageFormat::Png),
        )
        .unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let image = camera
            .request_frame(&CameraSettings::default())
            .await
            .unwrap();
        let data = image.read().await.unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_zoom_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("frame.jpg"), b"not really a jpeg").unwrap();
        let camera = DirectoryCamera::new(dir.path()).unwrap();
        let settings = CameraSettings {
            zoom: 0.5,
            ..CameraSettings::default()
        };
        assert!(matches!(
            camera.request_frame(&settings).await,
            Err(CaptureFailure::Image(_))
        ));
    }

    #[test]
    fn test_missing_directory() {
        assert!(DirectoryCamera::new("/definitely/not/a/camera").is_err());
    }
}
