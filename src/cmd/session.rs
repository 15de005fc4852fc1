//! The `session` subcommand.

use std::sync::Arc;

use clap::Args;
use tokio::sync::oneshot;

use crate::{
    async_utils::io::{read_json_or_toml, write_json},
    capabilities::{
        Grants, camera::DirectoryCamera, media_store::DirectoryMediaStore,
        permissions::StaticPermissions,
    },
    prelude::*,
    recognition::ocr_space::{OcrSpaceOpts, OcrSpaceRecognizer},
    screen::{Capabilities, CaptureScreen, CompletionCallback},
    script::read_actions,
    session::{CameraSettings, CaptureOutcome},
    ui::Ui,
    view::View,
};

/// Session command line arguments.
#[derive(Debug, Args)]
pub struct SessionOpts {
    /// A script of actions, one per line. Defaults to standard input.
    pub script_path: Option<PathBuf>,

    /// Directory of images the camera returns, one per capture. `front` and
    /// `back` subdirectories are used for the matching camera, if present.
    #[clap(long)]
    pub camera_dir: PathBuf,

    /// Directory where saved photos go.
    #[clap(long)]
    pub library_dir: PathBuf,

    /// Initial camera settings, as TOML or JSON.
    #[clap(long = "settings")]
    pub settings_path: Option<PathBuf>,

    /// Start without camera permission.
    #[clap(long)]
    pub deny_camera: bool,

    /// Start without media library permission.
    #[clap(long)]
    pub deny_storage: bool,

    /// Grant missing permissions when the script asks for them with `grant`.
    #[clap(long)]
    pub grant_on_request: bool,

    /// Where to write the outcome once a photo is saved. Defaults to standard
    /// output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub ocr: OcrSpaceOpts,
}

/// The `session` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_session(ui: Ui, opts: &SessionOpts) -> Result<()> {
    let settings = match &opts.settings_path {
        Some(path) => read_json_or_toml::<CameraSettings>(path).await?,
        None => CameraSettings::default(),
    };
    let grants = Grants {
        camera: !opts.deny_camera,
        storage: !opts.deny_storage,
    };
    let capabilities = Capabilities {
        permissions: Arc::new(StaticPermissions::new(grants, opts.grant_on_request)),
        camera: Arc::new(DirectoryCamera::new(&opts.camera_dir)?),
        storage: Arc::new(DirectoryMediaStore::new(&opts.library_dir)),
        recognizer: Arc::new(OcrSpaceRecognizer::from_opts(&opts.ocr)?),
    };

    // We play the part of the caller which opened the screen.
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let on_complete: CompletionCallback = Box::new(move |outcome: &CaptureOutcome| {
        let _ = outcome_tx.send(outcome.clone());
    });

    let screen = CaptureScreen::open(capabilities, settings, Some(on_complete)).await?;
    let actions = read_actions(opts.script_path.as_deref()).await?;
    screen
        .run(actions, |session| ui.show(&View::render(session)))
        .await?;

    match outcome_rx.await {
        Ok(outcome) => write_json(opts.output_path.as_deref(), &outcome).await,
        Err(_) => {
            warn!("Left the capture screen without saving a photo");
            Ok(())
        }
    }
}
