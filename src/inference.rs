use crate::config::{CaptionPolicy, InferenceConfig};
use bytes::BytesMut;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Transport error: {0}")]
    Transport(reqwest::Error),
    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),
    #[error("Failed to read response body: {0}")]
    BodyRead(reqwest::Error),
    #[error("Response body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Response body is not valid JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("Response body carried no `response` field")]
    MissingResponseField,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [&'a str; 1],
}

/// One object of the endpoint's newline-delimited streaming response.
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
}

pub struct InferenceClient {
    http: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
    policy: CaptionPolicy,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        // An unbounded request would occupy the single in-flight slot forever
        // if the server hangs.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(InferenceError::ClientBuild)?;
        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            policy: config.caption_policy,
        })
    }

    /// Sends one base64 JPEG to the generate endpoint and returns the caption.
    #[instrument(skip(self, image_b64))]
    pub async fn generate(&self, image_b64: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: [image_b64],
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::HttpStatus(status.as_u16()));
        }

        // Buffer the whole body before parsing; the transport is free to
        // deliver it in chunks that split a field or an escape sequence.
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::BodyRead(e)
                }
            })?;
            body.extend_from_slice(&chunk);
        }

        extract_caption(&body, self.policy)
    }
}

/// Parses a buffered generate response body (one or more newline-delimited
/// JSON objects) and combines the `response` fragments per the policy.
pub fn extract_caption(body: &[u8], policy: CaptionPolicy) -> Result<String, InferenceError> {
    let text = std::str::from_utf8(body)?;

    let mut caption = String::new();
    let mut found = false;
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let chunk: GenerateChunk = serde_json::from_str(line)?;
        if let Some(fragment) = chunk.response {
            found = true;
            match policy {
                CaptionPolicy::Accumulate => caption.push_str(&fragment),
                CaptionPolicy::Replace => caption = fragment,
            }
        }
    }
    if !found {
        return Err(InferenceError::MissingResponseField);
    }
    Ok(caption.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_streamed_fragments() {
        let body = concat!(
            "{\"model\":\"llava:13b\",\"response\":\"A dog\",\"done\":false}\n",
            "{\"model\":\"llava:13b\",\"response\":\" on a\",\"done\":false}\n",
            "{\"model\":\"llava:13b\",\"response\":\" couch\",\"done\":true}\n",
        );
        let caption = extract_caption(body.as_bytes(), CaptionPolicy::Accumulate).unwrap();
        assert_eq!(caption, "A dog on a couch");
    }

    #[test]
    fn replace_keeps_only_last_fragment() {
        let body = "{\"response\":\"partial\"}\n{\"response\":\"A full caption\"}\n";
        let caption = extract_caption(body.as_bytes(), CaptionPolicy::Replace).unwrap();
        assert_eq!(caption, "A full caption");
    }

    #[test]
    fn handles_escapes_inside_value() {
        let body = r#"{"response":"a \"quoted\" word, a backslash \\ and é"}"#;
        let caption = extract_caption(body.as_bytes(), CaptionPolicy::Accumulate).unwrap();
        assert_eq!(caption, "a \"quoted\" word, a backslash \\ and é");
    }

    #[test]
    fn value_split_across_delivery_chunks_is_reassembled() {
        let body = "{\"response\":\"a bicycle leaning against a brick wall\",\"done\":true}\n";
        // Split in the middle of the value, as the transport may deliver it.
        let (first, second) = body.as_bytes().split_at(25);

        let mut buffered = BytesMut::new();
        buffered.extend_from_slice(first);
        buffered.extend_from_slice(second);

        let caption = extract_caption(&buffered, CaptionPolicy::Accumulate).unwrap();
        assert_eq!(caption, "a bicycle leaning against a brick wall");
    }

    #[test]
    fn missing_field_is_an_error() {
        let body = "{\"done\":true}\n";
        assert!(matches!(
            extract_caption(body.as_bytes(), CaptionPolicy::Accumulate),
            Err(InferenceError::MissingResponseField)
        ));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let body = "{\"response\":\"truncated";
        assert!(matches!(
            extract_caption(body.as_bytes(), CaptionPolicy::Accumulate),
            Err(InferenceError::MalformedBody(_))
        ));
    }
}
