//! OCR engine interface.
//!
//! An [`OcrEngine`] must be loaded, given a language, and initialized before
//! it can recognize anything. [`lifecycle::EngineLifecycle`] enforces that
//! ordering, so most code should go through it rather than calling an engine
//! directly.

use std::sync::Arc;

use clap::ValueEnum;
use schemars::JsonSchema;

use crate::{intake::ImagePayload, prelude::*, progress::ProgressSink};

pub mod echo;
pub mod error;
pub mod lifecycle;
pub mod tesseract;

pub use self::error::EngineError;

/// The language we recognize if nobody tells us otherwise.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Text recognized in a single image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecognizedText {
    pub text: String,
}

/// Interface to an OCR engine.
///
/// Engines report progress by sending events to the [`ProgressSink`] they
/// were constructed with.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Load the engine itself.
    async fn load(&mut self) -> Result<()>;

    /// Load the model for `language`.
    async fn load_language(&mut self, language: &str) -> Result<()>;

    /// Prepare to recognize `language`, which must already be loaded.
    async fn initialize(&mut self, language: &str) -> Result<()>;

    /// Recognize the text in an image.
    async fn recognize(&self, payload: &ImagePayload) -> Result<RecognizedText>;

    /// Release any resources held by the engine.
    async fn terminate(&mut self) -> Result<()>;
}

/// Builds a fresh engine reporting to the given sink.
pub type EngineFactory = Arc<dyn Fn(ProgressSink) -> Box<dyn OcrEngine> + Send + Sync>;

/// The engines we know how to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// The `tesseract` command-line tool.
    #[default]
    Tesseract,
    /// Treat each input file as already-recognized UTF-8 text.
    Echo,
}

/// Engine configuration, normally loaded from a TOML or JSON file.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EngineConfig {
    /// The recognition language, using Tesseract's language codes.
    #[serde(default = "default_language")]
    pub language: String,

    /// The `tesseract` executable to run.
    #[serde(default = "default_tesseract_command")]
    pub command: PathBuf,

    /// Extra arguments passed to `tesseract` when recognizing an image, such
    /// as `["--psm", "6"]`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_owned()
}

fn default_tesseract_command() -> PathBuf {
    PathBuf::from("tesseract")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            command: default_tesseract_command(),
            extra_args: vec![],
        }
    }
}

/// Get a factory for the specified engine.
pub fn engine_factory(kind: EngineKind, config: EngineConfig) -> EngineFactory {
    match kind {
        EngineKind::Tesseract => Arc::new(move |sink| {
            Box::new(tesseract::TesseractOcrEngine::new(config.clone(), sink))
                as Box<dyn OcrEngine>
        }),
        EngineKind::Echo => {
            Arc::new(|sink| Box::new(echo::EchoOcrEngine::new(sink)) as Box<dyn OcrEngine>)
        }
    }
}
