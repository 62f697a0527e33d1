//! Errors reported by OCR engines.

use std::{fmt, time::Duration};

use thiserror::Error;

use super::lifecycle::EngineState;

/// One of the steps needed to get an engine ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareStep {
    Load,
    LoadLanguage,
    Initialize,
}

impl fmt::Display for PrepareStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareStep::Load => write!(f, "load"),
            PrepareStep::LoadLanguage => write!(f, "load language"),
            PrepareStep::Initialize => write!(f, "initialize"),
        }
    }
}

/// Something went wrong talking to an OCR engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be prepared. Nothing can be recognized.
    #[error("OCR engine initialization failed during {step} step")]
    InitializationFailed {
        step: PrepareStep,
        #[source]
        source: anyhow::Error,
    },

    /// Recognition was requested from an engine that isn't ready.
    #[error("OCR engine is not ready (state: {state:?})")]
    NotReady { state: EngineState },

    /// The engine failed to recognize one image.
    #[error("could not recognize {name}")]
    Recognition {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Recognition of one image took too long.
    #[error("recognizing {name} took longer than {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

impl EngineError {
    /// Does this error only affect a single image?
    pub fn is_per_image(&self) -> bool {
        matches!(
            self,
            EngineError::Recognition { .. } | EngineError::Timeout { .. }
        )
    }
}
