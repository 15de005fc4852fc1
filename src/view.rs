//! What the capture screen shows for a given session state.
//!
//! Rendering is a pure function of [`CaptureSession`]. Nothing here changes
//! state.

use std::fmt;

use crate::{
    capabilities::ImageRef,
    session::{CameraSettings, CaptureSession, Phase, RecognitionState},
};

/// Text shown while recognition is running.
pub const RECOGNIZING: &str = "Recognizing text...";

/// Text shown when recognition found nothing.
pub const NO_TEXT: &str = "No text recognized";

/// Text shown when recognition failed.
pub const RECOGNITION_ERROR: &str = "An error occurred while processing the image.";

/// A rendered screen.
#[derive(Clone, Debug, PartialEq)]
pub enum View<'a> {
    /// Ask for permissions. Nothing else is reachable.
    PermissionPrompt { diagnostic: Option<&'a str> },

    /// The live camera, with a shutter button.
    LivePreview {
        settings: &'a CameraSettings,
        diagnostic: Option<&'a str>,
    },

    /// The captured picture with its recognized text, and buttons to confirm or
    /// retake.
    Review {
        image: &'a ImageRef,
        ocr_result: &'a str,
        diagnostic: Option<&'a str>,
    },

    /// The picture has been saved.
    Saved,
}

impl<'a> View<'a> {
    /// Render `session`.
    pub fn render(session: &'a CaptureSession) -> Self {
        let diagnostic = session.diagnostic();
        match (session.phase(), session.captured_image()) {
            (Phase::AwaitingPermissions, _) => View::PermissionPrompt { diagnostic },
            (Phase::Finalizing, _) => View::Saved,
            (Phase::Reviewing, Some(image)) => View::Review {
                image,
                ocr_result: ocr_result_text(session.recognition_state()),
                diagnostic,
            },
            _ => View::LivePreview {
                settings: session.settings(),
                diagnostic,
            },
        }
    }
}

/// The text to show for a recognition state.
pub fn ocr_result_text(state: &RecognitionState) -> &str {
    match state {
        RecognitionState::NotStarted => "",
        RecognitionState::InFlight => RECOGNIZING,
        RecognitionState::Succeeded(text) if text.trim().is_empty() => NO_TEXT,
        RecognitionState::Succeeded(text) => text,
        RecognitionState::Failed(_) => RECOGNITION_ERROR,
    }
}

impl fmt::Display for View<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let diagnostic = match self {
            View::PermissionPrompt { diagnostic } => {
                writeln!(f, "We need camera and gallery permissions to continue.")?;
                write!(f, "[Grant Permissions]")?;
                diagnostic
            }
            View::LivePreview {
                settings,
                diagnostic,
            } => {
                writeln!(
                    f,
                    "Camera ready (zoom {}, facing {}, flash {}, torch {})",
                    settings.zoom,
                    settings.facing,
                    settings.flash,
                    if settings.torch { "on" } else { "off" },
                )?;
                write!(f, "[Capture]")?;
                diagnostic
            }
            View::Review {
                image,
                ocr_result,
                diagnostic,
            } => {
                writeln!(f, "Reviewing {}", image.path().display())?;
                writeln!(f, "OCR Result: {ocr_result}")?;
                write!(f, "[Confirm] [Retake]")?;
                diagnostic
            }
            View::Saved => return write!(f, "Photo saved!"),
        };
        if let Some(diagnostic) = diagnostic {
            write!(f, "\n! {diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::{Grants, PersistedRef},
        recognition::RecognitionFailure,
    };

    fn reviewing() -> CaptureSession {
        let mut session = CaptureSession::new(Grants::all(), CameraSettings::default());
        session
            .capture_succeeded(ImageRef::new("/tmp/photo.jpg"))
            .unwrap();
        session
    }

    #[test]
    fn test_permission_prompt_is_all_we_show() {
        let session = CaptureSession::new(Grants::none(), CameraSettings::default());
        let view = View::render(&session);
        assert_eq!(view, View::PermissionPrompt { diagnostic: None });
        assert!(view.to_string().contains("Grant Permissions"));
        assert!(!view.to_string().contains("Capture"));
    }

    #[test]
    fn test_live_preview_shows_settings_and_diagnostic() {
        let mut session = CaptureSession::new(Grants::all(), CameraSettings::default());
        session.report("camera busy");
        let text = View::render(&session).to_string();
        assert!(text.starts_with("Camera ready (zoom 0, facing back, flash off, torch off)"));
        assert!(text.ends_with("! camera busy"));
    }

    #[test]
    fn test_review_text_follows_recognition() {
        let mut session = reviewing();
        let view = View::render(&session);
        assert!(matches!(view, View::Review { ocr_result: "", .. }));

        let ticket = session.start_recognition().unwrap();
        assert!(View::render(&session).to_string().contains(RECOGNIZING));

        session.apply_recognition(ticket.generation, Ok("Olá mundo".to_owned()));
        assert!(
            View::render(&session)
                .to_string()
                .contains("OCR Result: Olá mundo")
        );
    }

    #[test]
    fn test_ocr_result_placeholders() {
        assert_eq!(
            ocr_result_text(&RecognitionState::Succeeded(" \n".to_owned())),
            NO_TEXT
        );
        assert_eq!(
            ocr_result_text(&RecognitionState::Failed(RecognitionFailure::Network)),
            RECOGNITION_ERROR
        );
    }

    #[test]
    fn test_saved() {
        let mut session = reviewing();
        session
            .finalize_succeeded(PersistedRef::new("/library/IMG_1.jpg"))
            .unwrap();
        assert_eq!(View::render(&session).to_string(), "Photo saved!");
    }
}
