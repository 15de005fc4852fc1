//! The capture screen event loop.
//!
//! A [`CaptureScreen`] owns one [`CaptureSession`] and the capabilities it
//! talks to. User actions arrive through [`CaptureScreen::dispatch`], and
//! recognition results arrive from background tasks over a channel. Both are
//! handled one at a time on the same task, so a retake can never interleave
//! with a recognition result halfway through being applied.
//!
//! Capture and save are awaited in place: while the camera or the media store
//! is busy, nothing else touches the session. Recognition runs in the
//! background, tagged with the [`Generation`] of the capture it belongs to.

use std::sync::Arc;

use futures::{Stream, StreamExt as _};
use tokio::sync::mpsc;

use crate::{
    capabilities::{Camera, MediaStore, PermissionGate},
    prelude::*,
    recognition::{RecognitionResult, Recognizer},
    session::{
        CameraSettings, CaptureOutcome, CaptureSession, Facing, FlashMode, Generation,
        Phase, RecognitionState, RecognitionTicket, SessionError,
    },
};

/// Called with the outcome once the photo has been saved.
pub type CompletionCallback = Box<dyn FnOnce(&CaptureOutcome) + Send>;

/// The outside systems used by a capture screen.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub permissions: Arc<dyn PermissionGate>,
    pub camera: Arc<dyn Camera>,
    pub storage: Arc<dyn MediaStore>,
    pub recognizer: Arc<dyn Recognizer>,
}

/// Something the user asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Look at our permissions again without prompting.
    CheckPermissions,
    /// Prompt for any missing permissions.
    RequestPermissions,
    SetZoom(f32),
    SetFacing(Facing),
    SetFlash(FlashMode),
    SetTorch(bool),
    /// Take a picture.
    Capture,
    /// Throw away the picture under review.
    Retake,
    /// Save the picture under review and finish.
    Confirm,
    /// Wait until recognition for the current picture has finished.
    AwaitRecognition,
}

/// What happened after an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// The screen is still open.
    Continue,
    /// The photo was saved and the screen is closed.
    Finished(CaptureOutcome),
}

/// Completions delivered from background tasks.
#[derive(Debug)]
enum Event {
    Recognized {
        generation: Generation,
        result: RecognitionResult,
    },
}

/// One visit to the capture screen.
pub struct CaptureScreen {
    session: CaptureSession,
    capabilities: Capabilities,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    on_complete: Option<CompletionCallback>,
}

impl CaptureScreen {
    /// Open the screen, checking which permissions we already hold.
    #[instrument(level = "debug", skip_all)]
    pub async fn open(
        capabilities: Capabilities,
        settings: CameraSettings,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Self> {
        settings.validate().context("invalid camera settings")?;
        let grants = capabilities
            .permissions
            .check()
            .await
            .context("cannot check permissions")?;
        debug!(?grants, "Opening capture screen");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session: CaptureSession::new(grants, settings),
            capabilities,
            events_tx,
            events_rx,
            on_complete,
        })
    }

    /// The current session state.
    #[cfg(test)]
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Handle one user action.
    ///
    /// Actions which aren't allowed right now are reported on the session and
    /// otherwise ignored. Only problems outside the workflow, or using a
    /// closed screen, return an error.
    pub async fn dispatch(&mut self, action: Action) -> Result<Step> {
        if self.session.phase() == Phase::Finalizing {
            return Err(anyhow!("capture screen is already closed"));
        }
        self.drain_events();
        debug!(?action, phase = %self.session.phase(), "Dispatching action");

        let result = match action {
            Action::CheckPermissions => {
                self.refresh_permissions(false).await;
                Ok(Step::Continue)
            }
            Action::RequestPermissions => {
                self.refresh_permissions(true).await;
                Ok(Step::Continue)
            }
            Action::SetZoom(zoom) => self.update_settings(|s| s.zoom = zoom),
            Action::SetFacing(facing) => self.update_settings(|s| s.facing = facing),
            Action::SetFlash(flash) => self.update_settings(|s| s.flash = flash),
            Action::SetTorch(torch) => self.update_settings(|s| s.torch = torch),
            Action::Capture => self.capture().await,
            Action::Retake => self.session.discard().map(|()| Step::Continue),
            Action::Confirm => self.confirm().await,
            Action::AwaitRecognition => {
                self.await_recognition().await;
                Ok(Step::Continue)
            }
        };
        match result {
            Ok(step) => Ok(step),
            Err(err) => {
                warn!("Rejected action: {err}");
                self.session.report(err.to_string());
                Ok(Step::Continue)
            }
        }
    }

    /// Run the screen until the photo is saved or we run out of actions.
    ///
    /// `render` is called with the session after every change, including
    /// changes caused by background recognition.
    pub async fn run<S>(
        mut self,
        mut actions: S,
        mut render: impl FnMut(&CaptureSession),
    ) -> Result<Option<CaptureOutcome>>
    where
        S: Stream<Item = Result<Action>> + Unpin,
    {
        render(&self.session);
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event) {
                        render(&self.session);
                    }
                }
                action = actions.next() => {
                    let Some(action) = action else {
                        info!("No more actions, leaving without saving");
                        return Ok(None);
                    };
                    let step = self.dispatch(action?).await?;
                    render(&self.session);
                    if let Step::Finished(outcome) = step {
                        return Ok(Some(outcome));
                    }
                }
            }
        }
    }

    /// Wait for recognition of the current capture to finish, applying any
    /// other results that arrive in the meantime.
    pub async fn await_recognition(&mut self) {
        while self.session.recognition_state() == &RecognitionState::InFlight {
            match self.events_rx.recv().await {
                Some(event) => {
                    self.handle_event(event);
                }
                None => break,
            }
        }
    }

    /// Apply any events which have already arrived.
    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// Apply one event. Returns `true` if the session changed.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Recognized { generation, result } => {
                let applied = self.session.apply_recognition(generation, result);
                if applied {
                    debug!(%generation, state = ?self.session.recognition_state(), "Recognition finished");
                } else {
                    debug!(
                        %generation,
                        current = ?self.session.current_generation(),
                        "Dropping stale recognition result"
                    );
                }
                applied
            }
        }
    }

    async fn refresh_permissions(&mut self, prompt: bool) {
        let permissions = &self.capabilities.permissions;
        let grants = if prompt {
            permissions.request().await
        } else {
            permissions.check().await
        };
        match grants {
            Ok(grants) => {
                self.session.apply_grants(grants);
                if !grants.all_granted() {
                    info!(?grants, "Camera and storage permissions are still needed");
                }
            }
            Err(err) => {
                error!("Could not get permissions: {err:#}");
                self.session
                    .report(format!("Could not get permissions: {err:#}"));
            }
        }
    }

    fn update_settings(
        &mut self,
        update: impl FnOnce(&mut CameraSettings),
    ) -> Result<Step, SessionError> {
        self.session.update_settings(update)?;
        Ok(Step::Continue)
    }

    async fn capture(&mut self) -> Result<Step, SessionError> {
        let settings = self.session.begin_capture()?;
        match self.capabilities.camera.request_frame(&settings).await {
            Ok(image) => {
                let generation = self.session.capture_succeeded(image)?;
                info!(%generation, "Picture taken");
                let ticket = self.session.start_recognition()?;
                self.spawn_recognition(ticket);
            }
            Err(failure) => {
                warn!("Could not take picture: {failure}");
                self.session.capture_failed(&failure);
            }
        }
        Ok(Step::Continue)
    }

    /// Start recognition in the background. The result comes back to us as
    /// an [`Event`], even if the user has moved on by then.
    fn spawn_recognition(&self, ticket: RecognitionTicket) {
        let recognizer = self.capabilities.recognizer.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            debug!(generation = %ticket.generation, "Recognizing text");
            let result = recognizer.recognize(&ticket.image).await;
            // If the screen is gone, nobody needs the result.
            let _ = events.send(Event::Recognized {
                generation: ticket.generation,
                result,
            });
        });
    }

    async fn confirm(&mut self) -> Result<Step, SessionError> {
        let image = self.session.begin_finalize()?;
        match self.capabilities.storage.persist(&image).await {
            Ok(persisted) => {
                let outcome = self.session.finalize_succeeded(persisted)?;
                if let Some(on_complete) = self.on_complete.take() {
                    on_complete(&outcome);
                }
                Ok(Step::Finished(outcome))
            }
            Err(err) => {
                error!("Could not save photo: {err:#}");
                self.session.finalize_failed(&err);
                Ok(Step::Continue)
            }
        }
    }

    /// Wait for the next background event and apply it.
    #[cfg(test)]
    async fn next_event(&mut self) -> bool {
        let event = self.events_rx.recv().await.expect("event channel closed");
        self.handle_event(event)
    }
}
