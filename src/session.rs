//! The capture session state machine.
//!
//! A [`CaptureSession`] holds all the mutable state for one visit to the
//! capture screen. Every method here is a pure, synchronous transition: the
//! session never talks to the camera, the network or the disk itself. The
//! [`crate::screen`] module owns the capabilities, feeds their results back in
//! through these transitions, and makes sure they arrive one at a time.
//!
//! Recognition results are matched to captures by [`Generation`], not by
//! image contents. Two captures may produce identical bytes, but they will
//! never share a generation.

use std::{error, fmt, mem, str::FromStr};

use schemars::JsonSchema;

use crate::{
    capabilities::{CaptureFailure, Grants, ImageRef, PersistedRef},
    prelude::*,
    recognition::{RecognitionFailure, RecognitionResult},
};

/// Which camera we're looking through.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// The camera on the screen side of the device.
    Front,
    /// The main camera.
    #[default]
    Back,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
        }
    }
}

impl FromStr for Facing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "front" => Ok(Facing::Front),
            "back" => Ok(Facing::Back),
            _ => Err(anyhow!("Unsupported camera facing: {:?}", s)),
        }
    }
}

/// Flash behavior when taking a picture.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashMode::Off => write!(f, "off"),
            FlashMode::On => write!(f, "on"),
            FlashMode::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for FlashMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(FlashMode::Off),
            "on" => Ok(FlashMode::On),
            "auto" => Ok(FlashMode::Auto),
            _ => Err(anyhow!("Unsupported flash mode: {:?}", s)),
        }
    }
}

/// Live preview camera settings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSettings {
    /// Digital zoom. 0.0 means no zoom.
    pub zoom: f32,

    /// Which camera to use.
    pub facing: Facing,

    /// Flash mode.
    pub flash: FlashMode,

    /// Keep the torch lit during preview.
    pub torch: bool,
}

impl CameraSettings {
    /// Check that these settings could be sent to a camera.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.zoom.is_finite() || self.zoom < 0.0 {
            return Err(SessionError::InvalidZoom(self.zoom));
        }
        Ok(())
    }
}

/// Identifies one capture within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the session is in the capture workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingPermissions,
    LivePreview,
    Reviewing,
    Finalizing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingPermissions => write!(f, "awaiting permissions"),
            Phase::LivePreview => write!(f, "live preview"),
            Phase::Reviewing => write!(f, "reviewing"),
            Phase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Text recognition progress for the current capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RecognitionState {
    #[default]
    NotStarted,
    InFlight,
    Succeeded(String),
    Failed(RecognitionFailure),
}

/// Shared "nothing captured" recognition state.
static NOT_STARTED: RecognitionState = RecognitionState::NotStarted;

/// Summary of [`RecognitionState`] reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    /// Recognition was never started.
    NotStarted,
    /// Recognition was still running when the photo was saved.
    Pending,
    /// Recognition finished. The text may still be empty.
    Succeeded,
    /// Recognition failed.
    Failed,
}

impl From<&RecognitionState> for RecognitionStatus {
    fn from(state: &RecognitionState) -> Self {
        match state {
            RecognitionState::NotStarted => RecognitionStatus::NotStarted,
            RecognitionState::InFlight => RecognitionStatus::Pending,
            RecognitionState::Succeeded(_) => RecognitionStatus::Succeeded,
            RecognitionState::Failed(_) => RecognitionStatus::Failed,
        }
    }
}

/// What we hand back to the caller once the photo has been saved.
#[derive(Clone, Debug, PartialEq, Serialize, JsonSchema)]
pub struct CaptureOutcome {
    /// The reference returned by the media store.
    pub image: PersistedRef,

    /// Recognized text, present only if recognition succeeded before the photo
    /// was saved.
    pub text: Option<String>,

    /// How far recognition got before the photo was saved.
    pub recognition: RecognitionStatus,
}

/// Everything needed to run recognition for one capture.
#[derive(Clone, Debug)]
pub struct RecognitionTicket {
    /// The capture this recognition belongs to.
    pub generation: Generation,

    /// The image to recognize.
    pub image: ImageRef,
}

/// Operations which are only allowed in some phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Capture,
    ChangeSettings,
    StartRecognition,
    Discard,
    Finalize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Capture => write!(f, "capture"),
            Operation::ChangeSettings => write!(f, "change camera settings"),
            Operation::StartRecognition => write!(f, "start recognition"),
            Operation::Discard => write!(f, "discard"),
            Operation::Finalize => write!(f, "finalize"),
        }
    }
}

/// A transition that the session refused to make.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionError {
    /// The operation isn't allowed in the current phase.
    NotAllowed { operation: Operation, phase: Phase },

    /// Zoom must be a finite, non-negative number.
    InvalidZoom(f32),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotAllowed { operation, phase } => {
                write!(f, "cannot {operation} while {phase}")
            }
            SessionError::InvalidZoom(zoom) => {
                write!(f, "zoom must be a non-negative number, got {zoom}")
            }
        }
    }
}

impl error::Error for SessionError {}

/// The image under review, and what we know about its text.
#[derive(Clone, Debug)]
struct Review {
    image: ImageRef,
    generation: Generation,
    recognition: RecognitionState,
}

/// Internal state. Only the phases which have a captured image carry one, so
/// "recognition without an image" can't be represented.
#[derive(Clone, Debug)]
enum State {
    AwaitingPermissions,
    LivePreview,
    Reviewing(Review),
    Finalizing(Review),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::AwaitingPermissions => Phase::AwaitingPermissions,
            State::LivePreview => Phase::LivePreview,
            State::Reviewing(_) => Phase::Reviewing,
            State::Finalizing(_) => Phase::Finalizing,
        }
    }

    fn review(&self) -> Option<&Review> {
        match self {
            State::Reviewing(review) | State::Finalizing(review) => Some(review),
            _ => None,
        }
    }
}

/// State for one visit to the capture screen.
#[derive(Clone, Debug)]
pub struct CaptureSession {
    state: State,
    settings: CameraSettings,

    /// The most recently issued generation. Only ever increases.
    last_generation: Generation,

    /// The last problem we want to show the user, if any.
    diagnostic: Option<String>,
}

impl CaptureSession {
    /// Start a new session with the permissions we currently hold.
    pub fn new(grants: Grants, settings: CameraSettings) -> Self {
        let state = if grants.all_granted() {
            State::LivePreview
        } else {
            State::AwaitingPermissions
        };
        Self {
            state,
            settings,
            last_generation: Generation::default(),
            diagnostic: None,
        }
    }

    /// Our current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Current camera settings.
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// The captured image, if we have one.
    pub fn captured_image(&self) -> Option<&ImageRef> {
        self.state.review().map(|review| &review.image)
    }

    /// The generation of the captured image, if we have one.
    pub fn current_generation(&self) -> Option<Generation> {
        self.state.review().map(|review| review.generation)
    }

    /// Recognition state for the captured image.
    pub fn recognition_state(&self) -> &RecognitionState {
        self.state
            .review()
            .map(|review| &review.recognition)
            .unwrap_or(&NOT_STARTED)
    }

    /// The last problem reported to the user.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Show a problem to the user.
    pub fn report(&mut self, message: impl Into<String>) {
        self.diagnostic = Some(message.into());
    }

    fn not_allowed(&self, operation: Operation) -> SessionError {
        SessionError::NotAllowed {
            operation,
            phase: self.phase(),
        }
    }

    fn require(&self, operation: Operation, phase: Phase) -> Result<(), SessionError> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(self.not_allowed(operation))
        }
    }

    /// Update the session after (re)checking permissions.
    ///
    /// Losing a permission while previewing or reviewing sends us back to the
    /// permission prompt and drops any captured image.
    pub fn apply_grants(&mut self, grants: Grants) {
        match (&self.state, grants.all_granted()) {
            (State::AwaitingPermissions, true) => {
                self.state = State::LivePreview;
                self.diagnostic = None;
            }
            (State::LivePreview | State::Reviewing(_), false) => {
                self.state = State::AwaitingPermissions;
            }
            _ => {}
        }
    }

    /// Change camera settings. Only allowed during live preview, and the new
    /// settings must be valid.
    pub fn update_settings(
        &mut self,
        update: impl FnOnce(&mut CameraSettings),
    ) -> Result<(), SessionError> {
        self.require(Operation::ChangeSettings, Phase::LivePreview)?;
        let mut settings = self.settings.clone();
        update(&mut settings);
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Check that we may capture, and get the settings to capture with.
    pub fn begin_capture(&self) -> Result<CameraSettings, SessionError> {
        self.require(Operation::Capture, Phase::LivePreview)?;
        Ok(self.settings.clone())
    }

    /// Record a successful capture and move to review.
    pub fn capture_succeeded(
        &mut self,
        image: ImageRef,
    ) -> Result<Generation, SessionError> {
        self.require(Operation::Capture, Phase::LivePreview)?;
        self.last_generation = self.last_generation.next();
        self.state = State::Reviewing(Review {
            image,
            generation: self.last_generation,
            recognition: RecognitionState::NotStarted,
        });
        self.diagnostic = None;
        Ok(self.last_generation)
    }

    /// Record a failed capture. We stay in live preview.
    pub fn capture_failed(&mut self, failure: &CaptureFailure) {
        self.report(format!("Could not take the picture: {failure}"));
    }

    /// Mark recognition as running for the captured image.
    pub fn start_recognition(&mut self) -> Result<RecognitionTicket, SessionError> {
        let operation = Operation::StartRecognition;
        let State::Reviewing(review) = &mut self.state else {
            return Err(self.not_allowed(operation));
        };
        if review.recognition != RecognitionState::NotStarted {
            return Err(self.not_allowed(operation));
        }
        review.recognition = RecognitionState::InFlight;
        Ok(RecognitionTicket {
            generation: review.generation,
            image: review.image.clone(),
        })
    }

    /// Apply a finished recognition.
    ///
    /// Returns `false` and changes nothing if the result belongs to an image
    /// we're no longer reviewing, or if a result was already applied.
    pub fn apply_recognition(
        &mut self,
        generation: Generation,
        result: RecognitionResult,
    ) -> bool {
        let State::Reviewing(review) = &mut self.state else {
            return false;
        };
        if review.generation != generation
            || review.recognition != RecognitionState::InFlight
        {
            return false;
        }
        review.recognition = match result {
            Ok(text) => RecognitionState::Succeeded(text),
            Err(failure) => RecognitionState::Failed(failure),
        };
        true
    }

    /// Throw away the captured image and go back to live preview.
    pub fn discard(&mut self) -> Result<(), SessionError> {
        self.require(Operation::Discard, Phase::Reviewing)?;
        self.state = State::LivePreview;
        self.diagnostic = None;
        Ok(())
    }

    /// Check that we may finalize, and get the image to persist.
    pub fn begin_finalize(&self) -> Result<ImageRef, SessionError> {
        match &self.state {
            State::Reviewing(review) => Ok(review.image.clone()),
            _ => Err(self.not_allowed(Operation::Finalize)),
        }
    }

    /// Record a failed save. We stay in review so the user can try again.
    pub fn finalize_failed(&mut self, error: &anyhow::Error) {
        self.report(format!("Could not save the picture: {error:#}"));
    }

    /// Record a successful save, and build the outcome for the caller from
    /// whatever recognition state we have right now.
    pub fn finalize_succeeded(
        &mut self,
        persisted: PersistedRef,
    ) -> Result<CaptureOutcome, SessionError> {
        let review = match mem::replace(&mut self.state, State::LivePreview) {
            State::Reviewing(review) => review,
            other => {
                self.state = other;
                return Err(self.not_allowed(Operation::Finalize));
            }
        };
        let text = match &review.recognition {
            RecognitionState::Succeeded(text) => Some(text.clone()),
            _ => None,
        };
        let outcome = CaptureOutcome {
            image: persisted,
            text,
            recognition: RecognitionStatus::from(&review.recognition),
        };
        self.state = State::Finalizing(review);
        self.diagnostic = None;
        Ok(outcome)
    }
}
