//! Frame programs: the ordered words → frames → durations description returned by the
//! sign-generation service, plus its wire format.

use serde::{Deserialize, Serialize};

use crate::foundation::core::MIN_FRAME_SECS;
use crate::foundation::error::{ReelError, ReelResult};

/// Request body sent to the sign-generation endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct FramesRequest<'a> {
    pub text: &'a str,
}

/// Response body of the sign-generation endpoint.
///
/// Only `frames` is required; the other fields default the same way the service's
/// browser client treated them (`total_duration || 0`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FramesResponse {
    #[serde(default)]
    pub sign_grammar: Option<String>,
    #[serde(default)]
    pub total_duration: Option<f64>,
    pub frames: Vec<WireWordBatch>,
}

/// One word of the wire payload. Frames are base64 image strings; entries may be null.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireWordBatch {
    #[serde(default)]
    pub frames: Vec<Option<String>>,
    #[serde(default)]
    pub durations: Vec<Option<f64>>,
}

/// Opaque raster payload for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameImage {
    /// Encoded still image bytes (JPEG, PNG, ...).
    Bytes(Vec<u8>),
    /// Base64 text as delivered on the wire, optionally with a `data:` URL prefix.
    Base64(String),
    /// Null or empty entry in the payload. Never drawn.
    Missing,
}

impl FrameImage {
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Base64(s) => s.trim().is_empty(),
        }
    }
}

/// Frames and per-frame display durations (seconds) for one word.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WordFrameBatch {
    pub frames: Vec<FrameImage>,
    pub durations: Vec<f64>,
}

impl WordFrameBatch {
    pub fn new(frames: Vec<FrameImage>, durations: Vec<f64>) -> Self {
        Self { frames, durations }
    }

    /// Display duration of frame `idx`, never shorter than [`MIN_FRAME_SECS`].
    ///
    /// Frames without a matching duration use the fallback.
    pub fn duration_at(&self, idx: usize) -> f64 {
        effective_duration(self.durations.get(idx).copied())
    }

    /// Whether `durations` lines up one-to-one with `frames`.
    pub fn is_aligned(&self) -> bool {
        self.durations.len() == self.frames.len()
    }
}

/// Clamp a raw duration to the minimum display time.
///
/// Missing, zero, negative and non-finite values fall back to [`MIN_FRAME_SECS`].
pub fn effective_duration(raw: Option<f64>) -> f64 {
    match raw {
        Some(d) if d.is_finite() => d.max(MIN_FRAME_SECS),
        _ => MIN_FRAME_SECS,
    }
}

/// The full ordered description produced by the service for one input text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameProgram {
    pub sign_grammar: String,
    pub words: Vec<WordFrameBatch>,
    /// Server-declared total duration in seconds. Authoritative for the stop timer.
    pub total_duration: f64,
}

impl FrameProgram {
    pub fn new(words: Vec<WordFrameBatch>, total_duration: f64) -> Self {
        Self {
            sign_grammar: String::new(),
            words,
            total_duration,
        }
    }

    pub fn with_sign_grammar(mut self, sign_grammar: impl Into<String>) -> Self {
        self.sign_grammar = sign_grammar.into();
        self
    }

    /// Build a program from a decoded service response.
    ///
    /// Fails with [`ReelError::EmptyProgram`] when the response carries no word batches.
    pub fn from_response(resp: FramesResponse) -> ReelResult<Self> {
        if resp.frames.is_empty() {
            return Err(ReelError::EmptyProgram);
        }

        let total_duration = match resp.total_duration {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => 0.0,
        };

        let words = resp
            .frames
            .into_iter()
            .map(|w| WordFrameBatch {
                frames: w
                    .frames
                    .into_iter()
                    .map(|f| match f {
                        Some(s) if !s.trim().is_empty() => FrameImage::Base64(s),
                        _ => FrameImage::Missing,
                    })
                    .collect(),
                // null durations are falsy on the wire and take the fallback later
                durations: w.durations.into_iter().map(|d| d.unwrap_or(0.0)).collect(),
            })
            .collect();

        Ok(Self {
            sign_grammar: resp.sign_grammar.unwrap_or_default(),
            words,
            total_duration,
        })
    }

    /// Parse a saved service response (JSON) into a program.
    pub fn from_json_slice(bytes: &[u8]) -> ReelResult<Self> {
        let resp: FramesResponse = serde_json::from_slice(bytes)
            .map_err(|e| ReelError::invalid_response(format!("frames payload: {e}")))?;
        Self::from_response(resp)
    }

    /// Total number of frame slots across all words, drawable or not.
    pub fn frame_count(&self) -> usize {
        self.words.iter().map(|w| w.frames.len()).sum()
    }

    /// Sum of effective per-frame durations over frames that carry a payload.
    pub fn summed_duration(&self) -> f64 {
        self.words
            .iter()
            .flat_map(|w| {
                w.frames
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| !f.is_missing())
                    .map(|(i, _)| w.duration_at(i))
            })
            .sum()
    }

    /// Compare the declared total with the summed per-frame durations.
    ///
    /// Returns the signed difference (`summed - declared`) when it exceeds `tolerance_secs`,
    /// logging it. The declared total is never adjusted.
    pub fn check_duration_divergence(&self, tolerance_secs: f64) -> Option<f64> {
        let summed = self.summed_duration();
        let diff = summed - self.total_duration;
        if diff.abs() > tolerance_secs {
            tracing::warn!(
                declared = self.total_duration,
                summed,
                diff,
                "declared total duration diverges from summed frame durations"
            );
            Some(diff)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_duration_applies_floor_and_fallback() {
        assert_eq!(effective_duration(Some(1.0)), 1.0);
        assert_eq!(effective_duration(Some(0.0)), MIN_FRAME_SECS);
        assert_eq!(effective_duration(Some(0.05)), MIN_FRAME_SECS);
        assert_eq!(effective_duration(Some(-3.0)), MIN_FRAME_SECS);
        assert_eq!(effective_duration(Some(f64::INFINITY)), MIN_FRAME_SECS);
        assert_eq!(effective_duration(None), MIN_FRAME_SECS);
    }

    #[test]
    fn unmatched_frames_use_fallback_duration() {
        let batch = WordFrameBatch::new(
            vec![
                FrameImage::Bytes(vec![1]),
                FrameImage::Bytes(vec![2]),
                FrameImage::Bytes(vec![3]),
            ],
            vec![0.5],
        );
        assert!(!batch.is_aligned());
        assert_eq!(batch.duration_at(0), 0.5);
        assert_eq!(batch.duration_at(1), MIN_FRAME_SECS);
        assert_eq!(batch.duration_at(2), MIN_FRAME_SECS);
    }

    #[test]
    fn response_without_words_is_empty_program() {
        let err = FrameProgram::from_json_slice(br#"{"sign_grammar":"HELLO","frames":[]}"#)
            .unwrap_err();
        assert!(matches!(err, ReelError::EmptyProgram));
    }

    #[test]
    fn response_missing_frames_field_is_invalid() {
        let err = FrameProgram::from_json_slice(br#"{"sign_grammar":"HELLO"}"#).unwrap_err();
        assert!(matches!(err, ReelError::InvalidResponse(_)));

        let err = FrameProgram::from_json_slice(b"not json").unwrap_err();
        assert!(matches!(err, ReelError::InvalidResponse(_)));
    }

    #[test]
    fn response_maps_nulls_and_defaults() {
        let json = br#"{
            "frames": [
                { "frames": ["QUJD", null, ""], "durations": [0.4, null] }
            ]
        }"#;
        let program = FrameProgram::from_json_slice(json).unwrap();
        assert_eq!(program.total_duration, 0.0);
        assert_eq!(program.sign_grammar, "");
        let batch = &program.words[0];
        assert_eq!(batch.frames[0], FrameImage::Base64("QUJD".to_string()));
        assert!(batch.frames[1].is_missing());
        assert!(batch.frames[2].is_missing());
        assert_eq!(batch.duration_at(1), MIN_FRAME_SECS);
    }

    #[test]
    fn divergence_is_reported_not_reconciled() {
        let program = FrameProgram::new(
            vec![WordFrameBatch::new(
                vec![FrameImage::Bytes(vec![1]), FrameImage::Bytes(vec![2])],
                vec![1.0, 1.0],
            )],
            3.0,
        );
        assert_eq!(program.summed_duration(), 2.0);
        let diff = program.check_duration_divergence(0.05).unwrap();
        assert!((diff + 1.0).abs() < 1e-9);
        assert_eq!(program.total_duration, 3.0);

        let aligned = FrameProgram::new(program.words.clone(), 2.0);
        assert!(aligned.check_duration_divergence(0.05).is_none());
    }
}
