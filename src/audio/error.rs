//! Playback error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a playback failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The media could not be opened, decoded or probed in time
    Load,
    /// The output device failed or disappeared
    PlaybackDevice,
    /// The media source cannot feed the spectrum analyzer
    AnalyzerUnsupported,
    /// The command is not valid in the current phase
    InvalidCommand,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Load => write!(f, "load error"),
            ErrorKind::PlaybackDevice => write!(f, "playback device error"),
            ErrorKind::AnalyzerUnsupported => write!(f, "analyzer unsupported"),
            ErrorKind::InvalidCommand => write!(f, "invalid command"),
        }
    }
}

/// User-facing error, stored in `PlaybackState::last_error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("Failed to load media: {0}")]
    Load(String),
    #[error("Playback device error: {0}")]
    PlaybackDevice(String),
    #[error("Media source does not support spectrum analysis")]
    AnalyzerUnsupported,
    /// Playback was requested before media was prepared
    #[error("No media prepared")]
    NotReady,
    #[error("Cannot {command}: {reason}")]
    InvalidCommand {
        command: &'static str,
        reason: String,
    },
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::Load(_) => ErrorKind::Load,
            PlaybackError::PlaybackDevice(_) => ErrorKind::PlaybackDevice,
            PlaybackError::AnalyzerUnsupported => ErrorKind::AnalyzerUnsupported,
            PlaybackError::NotReady | PlaybackError::InvalidCommand { .. } => {
                ErrorKind::InvalidCommand
            }
        }
    }

    /// Build an error of the given kind from a media source report
    pub fn from_kind(kind: ErrorKind, reason: String) -> Self {
        match kind {
            ErrorKind::Load => PlaybackError::Load(reason),
            ErrorKind::PlaybackDevice => PlaybackError::PlaybackDevice(reason),
            ErrorKind::AnalyzerUnsupported => PlaybackError::AnalyzerUnsupported,
            ErrorKind::InvalidCommand => PlaybackError::InvalidCommand {
                command: "continue",
                reason,
            },
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PlaybackError::Load("x".into()).kind(), ErrorKind::Load);
        assert_eq!(PlaybackError::NotReady.kind(), ErrorKind::InvalidCommand);
        assert_eq!(
            PlaybackError::from_kind(ErrorKind::PlaybackDevice, "gone".into()),
            PlaybackError::PlaybackDevice("gone".into())
        );
    }

    #[test]
    fn test_info_message() {
        let info = PlaybackError::InvalidCommand {
            command: "play",
            reason: "player is idle".to_string(),
        }
        .info();
        assert_eq!(info.kind, ErrorKind::InvalidCommand);
        assert_eq!(info.message, "Cannot play: player is idle");
    }
}
