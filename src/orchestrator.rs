//! Running a batch of images through OCR and code extraction.

use std::time::Duration;

use futures::{Stream, StreamExt as _, pin_mut};
use schemars::JsonSchema;

use crate::{
    codes::extract_code,
    engine::{EngineError, EngineFactory, RecognizedText, lifecycle::EngineLifecycle},
    intake::ImagePayload,
    prelude::*,
    progress::ProgressReporter,
    results::ResultStore,
};

/// What happened to a single image.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// We found a code.
    Ok,
    /// The image was recognized, but contained no code.
    NoCode,
    /// The image could not be recognized.
    Failed,
}

/// Diagnostic record for a single image.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ImageOutcome {
    /// The image's name, usually its path.
    pub name: String,

    /// What happened.
    pub status: OutcomeStatus,

    /// The extracted code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Why recognition failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything that happened during a run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// One outcome per input image, in input order.
    pub outcomes: Vec<ImageOutcome>,
}

impl RunSummary {
    /// How many images ended with `status`?
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Options for a [`BatchExtractor`].
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// The recognition language.
    pub language: String,

    /// Give up on an image after this long. There is no limit by default.
    pub timeout: Option<Duration>,
}

/// Drives extraction runs over batches of images.
///
/// Images are recognized one at a time, in order. A failure to recognize one
/// image never stops the run, but a failure to prepare the engine does.
pub struct BatchExtractor {
    engine: EngineLifecycle,
    progress: ProgressReporter,
    results: ResultStore,
    opts: ExtractOptions,
}

impl BatchExtractor {
    /// Create an extractor. The engine isn't built until the first run.
    pub fn new(
        factory: EngineFactory,
        progress: ProgressReporter,
        opts: ExtractOptions,
    ) -> Self {
        let engine = EngineLifecycle::new(factory, progress.sink());
        Self {
            engine,
            progress,
            results: ResultStore::new(),
            opts,
        }
    }

    /// Codes found by the most recent run.
    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Our progress reporter.
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Extract codes from `payloads`, replacing the results of any previous
    /// run.
    ///
    /// Returns an [`EngineError::InitializationFailed`] (wrapped in
    /// [`anyhow::Error`]) if the engine can't be prepared, in which case no
    /// image is recognized.
    #[instrument(level = "debug", skip_all)]
    pub async fn extract<S>(&mut self, payloads: S) -> Result<RunSummary>
    where
        S: Stream<Item = ImagePayload>,
    {
        self.results.reset();
        self.progress.reset();

        self.engine.acquire().await;
        self.engine.prepare(&self.opts.language).await?;
        debug!(state = ?self.engine.state(), "engine prepared");

        let mut summary = RunSummary::default();
        pin_mut!(payloads);
        while let Some(payload) = payloads.next().await {
            let outcome = match self.recognize(&payload).await {
                Ok(recognized) => match extract_code(&recognized.text) {
                    Some(code) => {
                        debug!(name = %payload.name, code, "found code");
                        self.results.append(code);
                        ImageOutcome {
                            name: payload.name,
                            status: OutcomeStatus::Ok,
                            code: Some(code.to_owned()),
                            error: None,
                        }
                    }
                    None => {
                        debug!(name = %payload.name, "no code found");
                        ImageOutcome {
                            name: payload.name,
                            status: OutcomeStatus::NoCode,
                            code: None,
                            error: None,
                        }
                    }
                },
                Err(err) if err.is_per_image() => {
                    let err = anyhow::Error::from(err);
                    warn!(name = %payload.name, "OCR failed: {:?}", err);
                    ImageOutcome {
                        name: payload.name,
                        status: OutcomeStatus::Failed,
                        code: None,
                        error: Some(format!("{:#}", err)),
                    }
                }
                Err(err) => return Err(err.into()),
            };
            summary.outcomes.push(outcome);
        }

        self.progress.complete();
        self.progress.flush().await?;
        Ok(summary)
    }

    /// Recognize one image, subject to our timeout.
    async fn recognize(
        &self,
        payload: &ImagePayload,
    ) -> Result<RecognizedText, EngineError> {
        match self.opts.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.engine.recognize(payload))
                .await
                .unwrap_or_else(|_elapsed| {
                    Err(EngineError::Timeout {
                        name: payload.name.clone(),
                        timeout,
                    })
                }),
            None => self.engine.recognize(payload).await,
        }
    }

    /// Shut down our engine.
    pub async fn release(&mut self) {
        self.engine.release().await;
    }
}
