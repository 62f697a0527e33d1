//! Echo engine for testing.
//!
//! This engine "recognizes" an image by decoding its bytes as UTF-8, which is
//! handy for tests and for re-running code extraction over text that was
//! OCRed elsewhere. Inputs which aren't valid UTF-8 fail to recognize.

use crate::{
    intake::ImagePayload,
    prelude::*,
    progress::{ProgressEvent, ProgressSink},
};

use super::{OcrEngine, RecognizedText};

/// Echo engine for testing.
pub struct EchoOcrEngine {
    sink: ProgressSink,
    language: Option<String>,
}

impl EchoOcrEngine {
    /// Create a new echo engine.
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            sink,
            language: None,
        }
    }
}

#[async_trait]
impl OcrEngine for EchoOcrEngine {
    async fn load(&mut self) -> Result<()> {
        self.sink.emit(ProgressEvent::new(1.0, "loaded echo engine"));
        Ok(())
    }

    async fn load_language(&mut self, language: &str) -> Result<()> {
        self.language = Some(language.to_owned());
        self.sink.emit(ProgressEvent::new(1.0, "loaded language"));
        Ok(())
    }

    async fn initialize(&mut self, language: &str) -> Result<()> {
        if self.language.as_deref() != Some(language) {
            return Err(anyhow!("language {:?} was never loaded", language));
        }
        self.sink.emit(ProgressEvent::new(1.0, "initialized"));
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(name = %payload.name))]
    async fn recognize(&self, payload: &ImagePayload) -> Result<RecognizedText> {
        self.sink.emit(ProgressEvent::new(0.0, "recognizing text"));
        let text = std::str::from_utf8(&payload.data)
            .with_context(|| format!("{} is not UTF-8 text", payload.name))?
            .to_owned();
        self.sink.emit(ProgressEvent::new(1.0, "recognizing text"));
        Ok(RecognizedText { text })
    }

    async fn terminate(&mut self) -> Result<()> {
        self.language = None;
        Ok(())
    }
}
