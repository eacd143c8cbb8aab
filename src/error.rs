use thiserror::Error;

use crate::global_event::activity::ActivityKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "Input monitoring permission denied ({0}). Grant accessibility / input monitoring access in the system settings and try again"
    )]
    PermissionDenied(String),

    #[error("A {0} session is already active")]
    AlreadyActive(ActivityKind),

    #[error("No capture session is active")]
    NotActive,

    #[error("Playback speed must be a positive number, got {0}")]
    InvalidSpeed(f64),

    #[error("Jitter radius must be a non-negative number of pixels, got {0}")]
    InvalidJitter(f64),

    #[error("Malformed macro: {0}")]
    MalformedInput(String),

    #[error("Unsupported macro format version {found} (supported: {supported:?})")]
    UnsupportedVersion {
        found: u64,
        supported: &'static [u64],
    },

    #[error("Failed to synthesize event #{index} ({event}): {reason}")]
    SynthesisFailure {
        index: usize,
        event: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input listener is no longer running")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MacroResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let permission = Error::PermissionDenied("EventTapError".into());
        assert!(permission.to_string().contains("permission denied"));

        let version = Error::UnsupportedVersion {
            found: 9,
            supported: &[1, 2],
        };
        assert_eq!(
            version.to_string(),
            "Unsupported macro format version 9 (supported: [1, 2])"
        );

        let active = Error::AlreadyActive(ActivityKind::Playback);
        assert_eq!(active.to_string(), "A playback session is already active");
    }
}
