//! Frame sources: where frame programs come from.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::foundation::error::{ReelError, ReelResult};
use crate::program::{FrameProgram, FramesRequest};

/// Obtains a [`FrameProgram`] for a piece of input text.
///
/// Each call is an independent round trip: no retries, no caching.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn request_program(&self, text: &str) -> ReelResult<FrameProgram>;
}

fn ensure_text(text: &str) -> ReelResult<()> {
    if text.trim().is_empty() {
        return Err(ReelError::validation("input text must be non-empty"));
    }
    Ok(())
}

/// `POST {text}` to the sign-generation endpoint and decode the frames payload.
#[derive(Clone, Debug)]
pub struct HttpFrameSource {
    client: Client,
    endpoint: String,
}

impl HttpFrameSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ReelResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReelError::network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    #[tracing::instrument(skip(self, text), fields(endpoint = %self.endpoint, text_len = text.len()))]
    async fn request_program(&self, text: &str) -> ReelResult<FrameProgram> {
        ensure_text(text)?;

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&FramesRequest { text })
            .send()
            .await
            .map_err(|e| ReelError::network(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ReelError::network(format!("HTTP error! Status: {status}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ReelError::network(format!("failed to read response body: {e}")))?;

        let program = FrameProgram::from_json_slice(&body)?;
        tracing::info!(
            words = program.words.len(),
            frames = program.frame_count(),
            total_duration = program.total_duration,
            "received frame program"
        );
        Ok(program)
    }
}

/// Serves a fixed program, e.g. one loaded from a saved service response.
#[derive(Clone, Debug)]
pub struct StaticFrameSource {
    program: FrameProgram,
}

impl StaticFrameSource {
    pub fn new(program: FrameProgram) -> Self {
        Self { program }
    }
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn request_program(&self, text: &str) -> ReelResult<FrameProgram> {
        ensure_text(text)?;
        if self.program.words.is_empty() {
            return Err(ReelError::EmptyProgram);
        }
        Ok(self.program.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{FrameImage, WordFrameBatch};

    #[tokio::test]
    async fn blank_text_never_issues_a_request() {
        // Unroutable endpoint: a request attempt would surface as a network error.
        let source =
            HttpFrameSource::new("http://127.0.0.1:9/get_frames", Duration::from_secs(1)).unwrap();
        let err = source.request_program("   ").await.unwrap_err();
        assert!(matches!(err, ReelError::Validation(_)));
    }

    #[tokio::test]
    async fn static_source_returns_its_program() {
        let program = FrameProgram::new(
            vec![WordFrameBatch::new(vec![FrameImage::Bytes(vec![1])], vec![1.0])],
            1.0,
        );
        let source = StaticFrameSource::new(program.clone());
        assert_eq!(source.request_program("hello").await.unwrap(), program);
        assert!(source.request_program("").await.is_err());
    }

    #[tokio::test]
    async fn static_source_with_no_words_is_empty_program() {
        let source = StaticFrameSource::new(FrameProgram::default());
        let err = source.request_program("hello").await.unwrap_err();
        assert!(matches!(err, ReelError::EmptyProgram));
    }
}
