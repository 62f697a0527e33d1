//! Tesseract OCR engine.

use std::{fs::File, io::Write as _, sync::LazyLock};

use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    intake::{ImagePayload, SUPPORTED_IMAGE_TYPES},
    prelude::*,
    progress::{ProgressEvent, ProgressSink},
};

use super::{EngineConfig, OcrEngine, RecognizedText};

/// Leptonica reports unreadable images on stderr, sometimes without a
/// non-zero exit status.
static IMAGE_READ_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Error in pix\w*Read").expect("failed to compile regex")
});

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractOcrEngine {
    /// Our configuration. `config.language` is ignored in favor of the
    /// language we are initialized with.
    config: EngineConfig,

    /// Where we report progress.
    sink: ProgressSink,

    /// Languages reported by `tesseract --list-langs`.
    available_languages: Vec<String>,

    /// The language we were initialized with.
    language: Option<String>,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine. Nothing is run until
    /// [`OcrEngine::load`] is called.
    pub fn new(config: EngineConfig, sink: ProgressSink) -> Self {
        Self {
            config,
            sink,
            available_languages: vec![],
            language: None,
        }
    }

    /// Run `tesseract` with `args` and return its standard output.
    async fn run(&self, args: &[&str], error_regex: Option<&Regex>) -> Result<String> {
        let output = Command::new(&self.config.command)
            .args(args)
            // If our caller gives up on us, don't leave `tesseract` running.
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("cannot run {:?}", self.config.command))?;
        check_for_command_failure("tesseract", &output, error_regex)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse the output of `tesseract --list-langs`, which starts with a header
/// line and then lists one language per line.
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of"))
        .map(str::to_owned)
        .collect()
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all)]
    async fn load(&mut self) -> Result<()> {
        self.sink
            .emit(ProgressEvent::new(0.0, "loading tesseract core"));
        let version = self.run(&["--version"], None).await?;
        debug!(
            version = version.lines().next().unwrap_or_default(),
            "found tesseract"
        );
        self.sink
            .emit(ProgressEvent::new(1.0, "loading tesseract core"));
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn load_language(&mut self, language: &str) -> Result<()> {
        self.sink
            .emit(ProgressEvent::new(0.0, "loading language traineddata"));
        self.available_languages = parse_language_list(&self.run(&["--list-langs"], None).await?);
        // Tesseract accepts combinations like `eng+fra`.
        for lang in language.split('+') {
            if !self.available_languages.iter().any(|l| l == lang) {
                return Err(anyhow!(
                    "tesseract has no traineddata for {:?} (available: {})",
                    lang,
                    self.available_languages.join(", ")
                ));
            }
        }
        self.sink
            .emit(ProgressEvent::new(1.0, "loading language traineddata"));
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn initialize(&mut self, language: &str) -> Result<()> {
        self.sink.emit(ProgressEvent::new(0.0, "initializing api"));
        if self.available_languages.is_empty() {
            return Err(anyhow!("must load a language before initializing"));
        }
        self.language = Some(language.to_owned());
        self.sink.emit(ProgressEvent::new(1.0, "initializing api"));
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(name = %payload.name))]
    async fn recognize(&self, payload: &ImagePayload) -> Result<RecognizedText> {
        let language = self
            .language
            .as_deref()
            .ok_or_else(|| anyhow!("tesseract has not been initialized"))?;
        if !SUPPORTED_IMAGE_TYPES.contains(&payload.mime_type.as_str()) {
            return Err(anyhow!(
                "tesseract cannot read {} images",
                payload.mime_type
            ));
        }
        let extension = mime_guess::get_mime_extensions_str(&payload.mime_type)
            .and_then(|o| o.first())
            .ok_or_else(|| {
                anyhow!("cannot determine extension for {}", payload.mime_type)
            })?;
        self.sink.emit(ProgressEvent::new(0.0, "recognizing text"));

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        let mut input_file =
            File::create(&input_path).context("cannot create tesseract input file")?;
        input_file
            .write_all(&payload.data)
            .context("cannot write tesseract input file")?;
        input_file
            .flush()
            .context("cannot flush tesseract input file")?;

        // Run tesseract, reading the text from standard output.
        let input_arg = input_path.to_string_lossy();
        let mut args = vec![&*input_arg, "stdout", "-l", language];
        args.extend(self.config.extra_args.iter().map(String::as_str));
        let text = self.run(&args, Some(&*IMAGE_READ_ERROR_REGEX)).await?;

        self.sink.emit(ProgressEvent::new(1.0, "recognizing text"));
        Ok(RecognizedText { text })
    }

    async fn terminate(&mut self) -> Result<()> {
        // There's no long-running process to stop.
        self.language = None;
        self.available_languages.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressReporter;

    #[test]
    fn detects_leptonica_read_errors() {
        assert!(IMAGE_READ_ERROR_REGEX.is_match("Error in pixReadStream: Unknown format: no pix returned"));
        assert!(IMAGE_READ_ERROR_REGEX.is_match("Error in pixReadMemPng: internal png error"));
        assert!(!IMAGE_READ_ERROR_REGEX.is_match("Estimating resolution as 312"));
    }

    #[test]
    fn parses_language_list() {
        let output = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nosd\nfra\n";
        assert_eq!(parse_language_list(output), vec!["eng", "osd", "fra"]);
    }

    #[tokio::test]
    async fn load_fails_without_executable() {
        let (reporter, _worker) = ProgressReporter::start();
        let config = EngineConfig {
            command: PathBuf::from("/nonexistent/tesseract"),
            ..EngineConfig::default()
        };
        let mut engine = TesseractOcrEngine::new(config, reporter.sink());
        assert!(engine.load().await.is_err());
    }

    #[tokio::test]
    async fn recognize_before_initialize_fails() {
        let (reporter, _worker) = ProgressReporter::start();
        let engine = TesseractOcrEngine::new(EngineConfig::default(), reporter.sink());
        let payload = ImagePayload::from_bytes("a.png", b"\x89PNG\r\n\x1a\n".to_vec());
        assert!(engine.recognize(&payload).await.is_err());
    }

    /// Write a fake `tesseract` which answers `--version` and `--list-langs`
    /// at once, but takes 2 seconds to recognize an image and then touches
    /// `marker`.
    #[cfg(unix)]
    fn write_slow_tesseract(dir: &Path, marker: &Path) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt as _;

        let script = dir.join("slow-tesseract");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 case \"$1\" in\n\
                 --version) echo 'tesseract 5.3.0' ;;\n\
                 --list-langs) printf 'List of available languages (1):\\neng\\n' ;;\n\
                 *) sleep 2; touch '{}' ;;\n\
                 esac\n",
                marker.display()
            ),
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        Ok(script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_recognition_kills_tesseract() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("codescan")?;
        let marker = tmpdir.path().join("finished");
        let config = EngineConfig {
            command: write_slow_tesseract(tmpdir.path(), &marker)?,
            ..EngineConfig::default()
        };
        let (reporter, _worker) = ProgressReporter::start();
        let mut engine = TesseractOcrEngine::new(config, reporter.sink());
        engine.load().await?;
        engine.load_language("eng").await?;
        engine.initialize("eng").await?;

        let payload = ImagePayload::from_bytes("a.png", b"\x89PNG\r\n\x1a\n".to_vec());
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            engine.recognize(&payload),
        )
        .await;
        assert!(result.is_err(), "recognition should have timed out");
        engine.terminate().await?;

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!marker.exists(), "tesseract kept running after timeout");
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn prepares_english() -> Result<()> {
        let (reporter, _worker) = ProgressReporter::start();
        let mut engine = TesseractOcrEngine::new(EngineConfig::default(), reporter.sink());
        engine.load().await?;
        engine.load_language("eng").await?;
        engine.initialize("eng").await?;
        Ok(())
    }
}
