//! Engine error taxonomy surfaced to the UI layer

use std::error::Error;
use std::fmt;

use serde::Serialize;

/// Why a plugin module failed to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadError {
    /// Not a loadable module, or it targets an ABI revision we don't speak
    IncompatibleFormat,
    /// The module loaded but exposes no plugin entry point
    EntryPointMissing,
    /// The module refused to initialize or activate
    InitFailed,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::IncompatibleFormat => write!(f, "incompatible plugin format"),
            LoadError::EntryPointMissing => write!(f, "plugin entry point missing"),
            LoadError::InitFailed => write!(f, "plugin initialization failed"),
        }
    }
}

/// Structured failures for every engine operation.
///
/// Device and plugin level failures are recovered locally; these variants are
/// the report, not a crash. Serialized across the command boundary so the
/// frontend can match on them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    /// The requested audio backend could not be opened; the previous one
    /// stays active.
    HostUnavailable,
    /// The requested stream value is unsupported; the nearest supported
    /// value was applied instead and is reported here.
    CapabilityMismatch { substituted: u32 },
    /// Loading a plugin module failed; no instance was created.
    Load { reason: LoadError },
    /// The operation needs a running stream.
    EngineStopped,
    /// Unknown instance, device, or path.
    NotFound,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::HostUnavailable => write!(f, "audio host unavailable"),
            EngineError::CapabilityMismatch { substituted } => {
                write!(f, "unsupported value, substituted {}", substituted)
            }
            EngineError::Load { reason } => write!(f, "plugin load failed: {}", reason),
            EngineError::EngineStopped => write!(f, "engine is not running"),
            EngineError::NotFound => write!(f, "not found"),
        }
    }
}

impl Error for EngineError {}

impl From<LoadError> for EngineError {
    fn from(reason: LoadError) -> Self {
        EngineError::Load { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_converts_to_engine_error() {
        let err: EngineError = LoadError::EntryPointMissing.into();
        assert_eq!(
            err,
            EngineError::Load {
                reason: LoadError::EntryPointMissing
            }
        );
    }

    #[test]
    fn capability_mismatch_serializes_substituted_value() {
        let err = EngineError::CapabilityMismatch { substituted: 48000 };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "capability_mismatch");
        assert_eq!(json["substituted"], 48000);
    }
}
