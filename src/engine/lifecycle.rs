//! Owning the one OCR engine we talk to.

use crate::{intake::ImagePayload, prelude::*, progress::ProgressSink};

use super::{
    EngineError, EngineFactory, OcrEngine, RecognizedText, error::PrepareStep,
};

/// Where an engine is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No engine has been built yet.
    Uninitialized,
    /// An engine has been built but not yet prepared.
    Loading,
    /// The engine can recognize images.
    Ready,
    /// Preparing the engine failed. It must be replaced before use.
    Failed,
    /// The engine was released.
    Terminated,
}

/// Builds, prepares and tears down a single [`OcrEngine`].
///
/// At most one engine exists at a time. Once an engine has been released or
/// has failed to prepare, [`EngineLifecycle::acquire`] replaces it with a
/// fresh one rather than reusing it.
pub struct EngineLifecycle {
    /// Builds new engines.
    factory: EngineFactory,

    /// Handed to every engine we build.
    sink: ProgressSink,

    /// Our current engine, if any.
    engine: Option<Box<dyn OcrEngine>>,

    /// The state of `engine`.
    state: EngineState,
}

impl EngineLifecycle {
    /// Create a lifecycle manager. No engine is built until
    /// [`Self::acquire`] is called.
    pub fn new(factory: EngineFactory, sink: ProgressSink) -> Self {
        Self {
            factory,
            sink,
            engine: None,
            state: EngineState::Uninitialized,
        }
    }

    /// The state of the current engine.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Make sure we have a usable engine, building one if needed.
    #[instrument(level = "debug", skip_all)]
    pub async fn acquire(&mut self) {
        match self.state {
            EngineState::Loading | EngineState::Ready if self.engine.is_some() => {
                trace!("reusing existing OCR engine");
            }
            _ => {
                // Never reuse a failed engine.
                self.terminate_current().await;
                debug!("building new OCR engine");
                self.engine = Some((self.factory)(self.sink.clone()));
                self.state = EngineState::Loading;
            }
        }
    }

    /// Load the engine and prepare it to recognize `language`. Does nothing
    /// if the engine is already ready.
    #[instrument(level = "debug", skip(self))]
    pub async fn prepare(&mut self, language: &str) -> Result<(), EngineError> {
        if self.state == EngineState::Ready {
            return Ok(());
        }
        let engine = match (&mut self.engine, self.state) {
            (Some(engine), EngineState::Loading) => engine,
            _ => return Err(EngineError::NotReady { state: self.state }),
        };

        match run_prepare_steps(engine.as_mut(), language).await {
            Ok(()) => {
                debug!("OCR engine ready");
                self.state = EngineState::Ready;
                Ok(())
            }
            Err((step, source)) => {
                error!("OCR engine failed during {} step: {:?}", step, source);
                self.state = EngineState::Failed;
                Err(EngineError::InitializationFailed { step, source })
            }
        }
    }

    /// Recognize one image. The engine must be ready.
    pub async fn recognize(
        &self,
        payload: &ImagePayload,
    ) -> Result<RecognizedText, EngineError> {
        match (&self.engine, self.state) {
            (Some(engine), EngineState::Ready) => {
                engine.recognize(payload).await.map_err(|source| {
                    EngineError::Recognition {
                        name: payload.name.clone(),
                        source,
                    }
                })
            }
            _ => Err(EngineError::NotReady { state: self.state }),
        }
    }

    /// Terminate and discard the current engine.
    #[instrument(level = "debug", skip_all)]
    pub async fn release(&mut self) {
        self.terminate_current().await;
        self.state = EngineState::Terminated;
    }

    async fn terminate_current(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if let Err(err) = engine.terminate().await {
                warn!("failed to terminate OCR engine: {:?}", err);
            }
        }
    }
}

/// Run each preparation step in order, stopping at the first failure.
async fn run_prepare_steps(
    engine: &mut dyn OcrEngine,
    language: &str,
) -> Result<(), (PrepareStep, anyhow::Error)> {
    engine
        .load()
        .await
        .map_err(|e| (PrepareStep::Load, e))?;
    engine
        .load_language(language)
        .await
        .map_err(|e| (PrepareStep::LoadLanguage, e))?;
    engine
        .initialize(language)
        .await
        .map_err(|e| (PrepareStep::Initialize, e))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        engine::{EngineConfig, echo::EchoOcrEngine, tesseract::TesseractOcrEngine},
        progress::ProgressReporter,
    };

    /// A lifecycle over echo engines which counts how many it has built.
    fn counting_lifecycle(reporter: &ProgressReporter) -> (EngineLifecycle, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let built_clone = built.clone();
        let factory: EngineFactory = Arc::new(move |sink| {
            built_clone.fetch_add(1, Ordering::SeqCst);
            Box::new(EchoOcrEngine::new(sink)) as Box<dyn OcrEngine>
        });
        (EngineLifecycle::new(factory, reporter.sink()), built)
    }

    #[tokio::test]
    async fn acquire_is_idempotent() -> Result<()> {
        let (reporter, _worker) = ProgressReporter::start();
        let (mut lifecycle, built) = counting_lifecycle(&reporter);
        assert_eq!(lifecycle.state(), EngineState::Uninitialized);

        lifecycle.acquire().await;
        lifecycle.acquire().await;
        assert_eq!(lifecycle.state(), EngineState::Loading);
        lifecycle.prepare("eng").await?;
        lifecycle.acquire().await;
        assert_eq!(lifecycle.state(), EngineState::Ready);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn recognize_requires_ready_engine() {
        let (reporter, _worker) = ProgressReporter::start();
        let (mut lifecycle, _built) = counting_lifecycle(&reporter);
        let payload = ImagePayload::from_bytes("a.txt", b"123456789012".to_vec());

        let err = lifecycle.recognize(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotReady {
                state: EngineState::Uninitialized
            }
        ));

        lifecycle.acquire().await;
        let err = lifecycle.recognize(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotReady {
                state: EngineState::Loading
            }
        ));
    }

    #[tokio::test]
    async fn prepare_without_acquire_is_not_ready() {
        let (reporter, _worker) = ProgressReporter::start();
        let (mut lifecycle, _built) = counting_lifecycle(&reporter);
        let err = lifecycle.prepare("eng").await.unwrap_err();
        assert!(matches!(err, EngineError::NotReady { .. }));
    }

    #[tokio::test]
    async fn failed_engine_is_replaced_on_next_acquire() -> Result<()> {
        // The first engine can't find its executable. Later ones are echo
        // engines, which always prepare.
        let built = Arc::new(AtomicUsize::new(0));
        let built_clone = built.clone();
        let factory: EngineFactory = Arc::new(move |sink| {
            if built_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                let config = EngineConfig {
                    command: PathBuf::from("/nonexistent/tesseract"),
                    ..EngineConfig::default()
                };
                Box::new(TesseractOcrEngine::new(config, sink)) as Box<dyn OcrEngine>
            } else {
                Box::new(EchoOcrEngine::new(sink)) as Box<dyn OcrEngine>
            }
        });
        let (reporter, _worker) = ProgressReporter::start();
        let mut lifecycle = EngineLifecycle::new(factory, reporter.sink());

        lifecycle.acquire().await;
        let err = lifecycle.prepare("eng").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InitializationFailed {
                step: PrepareStep::Load,
                ..
            }
        ));
        assert_eq!(lifecycle.state(), EngineState::Failed);

        lifecycle.acquire().await;
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(lifecycle.state(), EngineState::Loading);
        lifecycle.prepare("eng").await?;
        assert_eq!(lifecycle.state(), EngineState::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn release_forces_a_fresh_engine() -> Result<()> {
        let (reporter, _worker) = ProgressReporter::start();
        let (mut lifecycle, built) = counting_lifecycle(&reporter);
        lifecycle.acquire().await;
        lifecycle.prepare("eng").await?;
        lifecycle.release().await;
        assert_eq!(lifecycle.state(), EngineState::Terminated);

        let payload = ImagePayload::from_bytes("a.txt", b"123456789012".to_vec());
        assert!(lifecycle.recognize(&payload).await.is_err());

        lifecycle.acquire().await;
        lifecycle.prepare("eng").await?;
        let text = lifecycle.recognize(&payload).await?;
        assert_eq!(text.text, "123456789012");
        assert_eq!(built.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
