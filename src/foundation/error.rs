pub type ReelResult<T> = Result<T, ReelError>;

#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("empty program: the service returned no word batches")]
    EmptyProgram,

    #[error("no frames: {0}")]
    NoFrames(String),

    #[error("frame decode error: {0}")]
    FrameDecode(String),

    #[error("not capturing: finalize called while the recorder is idle")]
    NotCapturing,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReelError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn no_frames(msg: impl Into<String>) -> Self {
        Self::NoFrames(msg.into())
    }

    pub fn frame_decode(msg: impl Into<String>) -> Self {
        Self::FrameDecode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Whether a fresh, user-initiated attempt could plausibly succeed.
    ///
    /// Nothing in the crate retries on its own; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ReelError::network("x")
                .to_string()
                .contains("network error:")
        );
        assert!(
            ReelError::invalid_response("x")
                .to_string()
                .contains("invalid response:")
        );
        assert!(ReelError::no_frames("x").to_string().contains("no frames:"));
        assert!(
            ReelError::frame_decode("x")
                .to_string()
                .contains("frame decode error:")
        );
        assert!(
            ReelError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(ReelError::encode("x").to_string().contains("encode error:"));
        assert!(ReelError::NotCapturing.to_string().contains("not capturing"));
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(ReelError::network("timeout").is_retryable());
        assert!(!ReelError::EmptyProgram.is_retryable());
        assert!(!ReelError::invalid_response("x").is_retryable());
        assert!(!ReelError::Cancelled.is_retryable());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ReelError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
