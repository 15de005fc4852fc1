//! Scripted user actions.
//!
//! A script is a text file with one action per line. Blank lines and lines
//! starting with `#` are ignored.
//!
//! ```text
//! grant
//! zoom 0.5
//! flash auto
//! capture
//! wait
//! confirm
//! ```

use std::str::FromStr;

use futures::StreamExt as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio_stream::wrappers::LinesStream;

use crate::{async_utils::BoxedStream, prelude::*, screen::Action};

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let mut words = s.split_whitespace();
            let verb = words.next().ok_or_else(|| anyhow!("Missing action"))?;
            let mut arg = || {
                words
                    .next()
                    .ok_or_else(|| anyhow!("{verb} needs a value"))
            };
            let action = match verb {
                "check" => Action::CheckPermissions,
                "grant" => Action::RequestPermissions,
                "zoom" => Action::SetZoom(arg()?.parse::<f32>()?),
                "facing" => Action::SetFacing(arg()?.parse()?),
                "flash" => Action::SetFlash(arg()?.parse()?),
                "torch" => Action::SetTorch(match arg()? {
                    "on" => true,
                    "off" => false,
                    other => return Err(anyhow!("torch must be on or off, not {other:?}")),
                }),
                "capture" => Action::Capture,
                "retake" | "discard" => Action::Retake,
                "confirm" | "finalize" => Action::Confirm,
                "wait" => Action::AwaitRecognition,
                _ => return Err(anyhow!("Unknown action {verb:?}")),
            };
            if let Some(extra) = words.next() {
                return Err(anyhow!("Unexpected {extra:?} after {verb}"));
            }
            Ok(action)
        };
        parse(s).with_context(|| format!("Failed to parse action: {:?}", s))
    }
}

/// Should this script line be skipped?
fn is_blank_or_comment(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

/// Read actions from a script file, or from standard input.
///
/// Actions are parsed as they're read, so an interactive user can type them.
pub async fn read_actions(path: Option<&Path>) -> Result<BoxedStream<Result<Action>>> {
    let lines = match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open script at path: {:?}", path))?;
            LinesStream::new(BufReader::new(file).lines()).boxed()
        }
        None => LinesStream::new(BufReader::new(tokio::io::stdin()).lines()).boxed(),
    };
    Ok(lines
        .filter_map(|line| async move {
            match line {
                Ok(line) if is_blank_or_comment(&line) => None,
                Ok(line) => Some(line.parse::<Action>()),
                Err(err) => Some(Err(err).context("Failed to read script")),
            }
        })
        .boxed())
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;

    use super::*;
    use crate::session::{Facing, FlashMode};

    #[test]
    fn test_parse() {
        let cases = [
            ("check", Action::CheckPermissions),
            ("grant", Action::RequestPermissions),
            ("zoom 0.5", Action::SetZoom(0.5)),
            ("facing front", Action::SetFacing(Facing::Front)),
            ("flash auto", Action::SetFlash(FlashMode::Auto)),
            ("torch on", Action::SetTorch(true)),
            ("  capture  ", Action::Capture),
            ("retake", Action::Retake),
            ("discard", Action::Retake),
            ("confirm", Action::Confirm),
            ("wait", Action::AwaitRecognition),
        ];
        for (line, expected) in cases {
            assert_eq!(line.parse::<Action>().unwrap(), expected, "line: {line:?}");
        }
    }

    #[test]
    fn test_failed_parse() {
        for line in [
            "",
            "jump",
            "zoom",
            "zoom lots",
            "facing sideways",
            "flash strobe",
            "torch maybe",
            "capture now",
        ] {
            assert!(line.parse::<Action>().is_err(), "line: {line:?}");
        }
    }

    #[tokio::test]
    async fn test_read_actions_skips_comments() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.txt");
        std::fs::write(&path, "# take one picture\n\ncapture\n  # then\nconfirm\n").unwrap();
        let actions = read_actions(Some(&path))
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(actions, vec![Action::Capture, Action::Confirm]);
    }

    #[tokio::test]
    async fn test_read_actions_reports_bad_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.txt");
        std::fs::write(&path, "capture\nexplode\n").unwrap();
        let result = read_actions(Some(&path))
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await;
        assert!(format!("{:#}", result.unwrap_err()).contains("explode"));
    }
}
