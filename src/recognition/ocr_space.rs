//! Client for the OCR.space text recognition API.
//!
//! We upload one JPEG per request as `multipart/form-data`, along with our API
//! key and a language hint, and read the text of the first parsed result. See
//! <https://ocr.space/OCRAPI> for the wire format.

use std::{env, fmt};

use clap::Args;
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};

use crate::{capabilities::ImageRef, prelude::*};

use super::{RecognitionFailure, RecognitionResult, Recognizer};

/// The public OCR.space endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Portuguese.
pub const DEFAULT_LANGUAGE: &str = "por";

/// Environment variable holding our API key.
pub const API_KEY_VAR: &str = "OCR_SPACE_API_KEY";

/// Options for talking to the recognition service.
#[derive(Args, Clone, Debug)]
pub struct OcrSpaceOpts {
    /// URL of the OCR endpoint to upload photos to.
    #[clap(long, default_value = DEFAULT_ENDPOINT)]
    pub ocr_endpoint: String,

    /// Language hint sent with every photo, as an OCR.space language code.
    #[clap(long, default_value = DEFAULT_LANGUAGE)]
    pub ocr_language: String,
}

/// A [`Recognizer`] which calls OCR.space (or a compatible server).
pub struct OcrSpaceRecognizer {
    client: reqwest::Client,
    endpoint: String,
    language: String,
    api_key: String,
}

impl OcrSpaceRecognizer {
    /// Create a new recognizer.
    pub fn new(
        endpoint: impl Into<String>,
        language: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            language: language.into(),
            api_key: api_key.into(),
        }
    }

    /// Create a new recognizer from command-line options, reading our API key
    /// from the environment.
    pub fn from_opts(opts: &OcrSpaceOpts) -> Result<Self> {
        let api_key = env::var(API_KEY_VAR)
            .with_context(|| format!("{API_KEY_VAR} must be set to use text recognition"))?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("{API_KEY_VAR} is empty"));
        }
        Ok(Self::new(&opts.ocr_endpoint, &opts.ocr_language, api_key))
    }

    /// Build our upload form.
    fn form(&self, data: Vec<u8>) -> reqwest::Result<Form> {
        let file = Part::bytes(data)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        Ok(Form::new()
            .part("file", file)
            .text("apikey", self.api_key.clone())
            .text("language", self.language.clone()))
    }
}

// Keep our API key out of the logs.
impl fmt::Debug for OcrSpaceRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrSpaceRecognizer")
            .field("endpoint", &self.endpoint)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Recognizer for OcrSpaceRecognizer {
    #[instrument(level = "debug", skip_all, fields(image = %image.id()))]
    async fn recognize(&self, image: &ImageRef) -> RecognitionResult {
        // If we can't even build the request, we never reached the service.
        let data = image.read().await.map_err(|err| {
            error!("Could not load image for recognition: {err:#}");
            RecognitionFailure::Network
        })?;
        let form = self.form(data).map_err(|err| {
            error!("Could not build recognition request: {err}");
            RecognitionFailure::Network
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                warn!("Recognition request failed: {err}");
                RecognitionFailure::Network
            })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            warn!("Could not read recognition response: {err}");
            RecognitionFailure::Network
        })?;
        classify_response(status, &body)
    }
}

/// The parts of an OCR.space response we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    /// One entry per page or image.
    parsed_results: Option<Vec<ParsedResult>>,

    #[serde(default)]
    is_errored_on_processing: bool,

    #[serde(default)]
    error_message: Option<ErrorMessage>,
}

/// A single parsed page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    parsed_text: Option<String>,
}

/// OCR.space sends error messages as either a string or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn is_empty(&self) -> bool {
        match self {
            ErrorMessage::One(msg) => msg.trim().is_empty(),
            ErrorMessage::Many(msgs) => msgs.iter().all(|msg| msg.trim().is_empty()),
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMessage::One(msg) => f.write_str(msg),
            ErrorMessage::Many(msgs) => f.write_str(&msgs.join("; ")),
        }
    }
}

/// Turn an HTTP response into a [`RecognitionResult`].
///
/// An empty results list is a success with empty text: the service looked and
/// found nothing, which is different from the request failing.
fn classify_response(status: StatusCode, body: &[u8]) -> RecognitionResult {
    if !status.is_success() {
        warn!(
            %status,
            body = %String::from_utf8_lossy(body),
            "Recognition service returned an error status"
        );
        return Err(RecognitionFailure::Parse);
    }

    let response = serde_json::from_slice::<OcrSpaceResponse>(body).map_err(|err| {
        warn!("Could not parse recognition response: {err}");
        RecognitionFailure::Parse
    })?;
    trace!(?response, "Recognition response");

    if let Some(message) = &response.error_message
        && !message.is_empty()
    {
        warn!(%message, "Recognition service reported an error");
        return Err(RecognitionFailure::Parse);
    }
    if response.is_errored_on_processing {
        warn!("Recognition service reported a processing error");
        return Err(RecognitionFailure::Parse);
    }

    match response.parsed_results {
        None => {
            warn!("Recognition response has no parsed results");
            Err(RecognitionFailure::Parse)
        }
        Some(results) => match results.into_iter().next() {
            None => Ok(String::new()),
            Some(ParsedResult {
                parsed_text: Some(text),
            }) => Ok(text),
            Some(ParsedResult { parsed_text: None }) => {
                warn!("First parsed result has no text");
                Err(RecognitionFailure::Parse)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;

    /// Accept one HTTP request on a local port and answer it with `status` and
    /// `body`. The task returns the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/parse/image", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    /// Have we read a whole request?
    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end].lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        });
        match content_length {
            Some(len) => request.len() >= header_end + 4 + len,
            None => text.ends_with("--\r\n"),
        }
    }

    fn captured_image(dir: &tempfile::TempDir) -> ImageRef {
        let path = dir.path().join("capture.jpg");
        std::fs::write(&path, b"\xff\xd8fake jpeg\xff\xd9").unwrap();
        ImageRef::new(path)
    }

    #[tokio::test]
    async fn test_recognize_uploads_form_and_reads_text() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"ParsedResults":[{"ParsedText":"Hello","FileParseExitCode":1}],"OCRExitCode":1,"IsErroredOnProcessing":false}"#,
        )
        .await;
        let dir = tempfile::TempDir::new().unwrap();
        let recognizer = OcrSpaceRecognizer::new(url, "por", "test-key");

        let result = recognizer.recognize(&captured_image(&dir)).await;
        assert_eq!(result, Ok("Hello".to_owned()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /parse/image"));
        assert!(request.contains("multipart/form-data"));
        assert!(request.contains(r#"name="file"; filename="photo.jpg""#));
        assert!(request.contains("image/jpeg"));
        assert!(request.contains(r#"name="apikey""#));
        assert!(request.contains("test-key"));
        assert!(request.contains(r#"name="language""#));
        assert!(request.contains("por"));
    }

    #[tokio::test]
    async fn test_recognize_error_status_is_parse_failure() {
        let (url, server) = serve_once("500 Internal Server Error", "{}").await;
        let dir = tempfile::TempDir::new().unwrap();
        let recognizer = OcrSpaceRecognizer::new(url, "por", "test-key");
        let result = recognizer.recognize(&captured_image(&dir)).await;
        assert_eq!(result, Err(RecognitionFailure::Parse));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_recognize_connection_refused_is_network_failure() {
        // Grab a free port, then close it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::TempDir::new().unwrap();
        let recognizer =
            OcrSpaceRecognizer::new(format!("http://{addr}/parse/image"), "por", "test-key");
        let result = recognizer.recognize(&captured_image(&dir)).await;
        assert_eq!(result, Err(RecognitionFailure::Network));
    }

    #[tokio::test]
    async fn test_recognize_missing_image_is_network_failure() {
        let recognizer = OcrSpaceRecognizer::new(DEFAULT_ENDPOINT, "por", "test-key");
        let image = ImageRef::new("/definitely/not/a/capture.jpg");
        let result = recognizer.recognize(&image).await;
        assert_eq!(result, Err(RecognitionFailure::Network));
    }

    #[test]
    fn test_classify_empty_results_is_empty_text() {
        let body = br#"{"ParsedResults":[],"IsErroredOnProcessing":false}"#;
        assert_eq!(classify_response(StatusCode::OK, body), Ok(String::new()));
    }

    #[test]
    fn test_classify_uses_first_result_verbatim() {
        let body = br#"{"ParsedResults":[{"ParsedText":"  line 1\r\nline 2 "},{"ParsedText":"page 2"}]}"#;
        assert_eq!(
            classify_response(StatusCode::OK, body),
            Ok("  line 1\r\nline 2 ".to_owned())
        );
    }

    #[test]
    fn test_classify_failures() {
        let cases: &[(StatusCode, &[u8])] = &[
            (StatusCode::FORBIDDEN, br#"{"ParsedResults":[]}"#),
            (StatusCode::OK, b"not json"),
            (StatusCode::OK, br#""The API key is invalid""#),
            (StatusCode::OK, br#"{"OCRExitCode":99}"#),
            (
                StatusCode::OK,
                br#"{"ParsedResults":null,"IsErroredOnProcessing":true,"ErrorMessage":["Unable to recognize the file type"]}"#,
            ),
            (
                StatusCode::OK,
                br#"{"ParsedResults":[{"ParsedText":""}],"ErrorMessage":"Timed out waiting for results"}"#,
            ),
            (StatusCode::OK, br#"{"ParsedResults":[{"FileParseExitCode":-10}]}"#),
        ];
        for (status, body) in cases {
            assert_eq!(
                classify_response(*status, body),
                Err(RecognitionFailure::Parse),
                "body: {}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_classify_ignores_blank_error_message() {
        let body = br#"{"ParsedResults":[{"ParsedText":"ok"}],"ErrorMessage":""}"#;
        assert_eq!(classify_response(StatusCode::OK, body), Ok("ok".to_owned()));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let recognizer = OcrSpaceRecognizer::new(DEFAULT_ENDPOINT, "por", "secret-key");
        assert!(!format!("{recognizer:?}").contains("secret-key"));
    }
}
