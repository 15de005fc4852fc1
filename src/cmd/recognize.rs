//! The `recognize` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json,
    capabilities::ImageRef,
    prelude::*,
    recognition::{
        RecognitionReport, Recognizer as _,
        ocr_space::{OcrSpaceOpts, OcrSpaceRecognizer},
    },
    ui::{SpinnerConfig, Ui},
};

/// Recognize command line arguments.
#[derive(Debug, Args)]
pub struct RecognizeOpts {
    /// The photo to recognize.
    pub image_path: PathBuf,

    /// Where to write the result. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub ocr: OcrSpaceOpts,
}

/// The `recognize` subcommand.
///
/// Recognition failures are reported in the output rather than as an error,
/// the same way a capture session treats them.
#[instrument(level = "debug", skip_all, fields(image = %opts.image_path.display()))]
pub async fn cmd_recognize(ui: Ui, opts: &RecognizeOpts) -> Result<()> {
    let recognizer = OcrSpaceRecognizer::from_opts(&opts.ocr)?;
    if !opts.image_path.is_file() {
        return Err(anyhow!("no image at {:?}", opts.image_path));
    }
    let image = ImageRef::new(&opts.image_path);

    let spinner = ui.new_spinner(&SpinnerConfig {
        emoji: "🔎",
        msg: "Recognizing text",
        done_msg: "Recognized text",
    });
    let result = recognizer.recognize(&image).await;
    match &result {
        Ok(_) => spinner.finish_using_style(),
        Err(failure) => spinner.abandon_with_message(format!("Recognition failed ({failure})")),
    }

    write_json(opts.output_path.as_deref(), &RecognitionReport::from(result)).await
}
