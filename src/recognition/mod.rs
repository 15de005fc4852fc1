//! Text recognition interface.

use std::{error, fmt};

use schemars::JsonSchema;

use crate::{capabilities::ImageRef, prelude::*};

pub mod ocr_space;

/// Why recognition didn't produce any text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionFailure {
    /// We couldn't talk to the recognition service.
    Network,

    /// The service answered, but not with anything we could use.
    Parse,
}

impl fmt::Display for RecognitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionFailure::Network => write!(f, "network"),
            RecognitionFailure::Parse => write!(f, "parse"),
        }
    }
}

impl error::Error for RecognitionFailure {}

/// Recognized text (possibly empty), or why there isn't any.
pub type RecognitionResult = Result<String, RecognitionFailure>;

/// A text recognition engine.
///
/// Failures are part of the result rather than an error, because recognition
/// problems never stop the capture workflow.
#[async_trait]
pub trait Recognizer: fmt::Debug + Send + Sync + 'static {
    /// Recognize the text in `image`.
    async fn recognize(&self, image: &ImageRef) -> RecognitionResult;
}

/// A recognition result in a form that can be printed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct RecognitionReport {
    /// The recognized text, if recognition succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Why recognition failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RecognitionFailure>,
}

impl From<RecognitionResult> for RecognitionReport {
    fn from(result: RecognitionResult) -> Self {
        match result {
            Ok(text) => Self {
                text: Some(text),
                failure: None,
            },
            Err(failure) => Self {
                text: None,
                failure: Some(failure),
            },
        }
    }
}
