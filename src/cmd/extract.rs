//! The `extract` subcommand.

use std::time::Duration;

use clap::Args;
use futures::{StreamExt as _, stream};

use crate::{
    async_utils::io::{read_json_or_toml, write_output},
    engine::{EngineConfig, EngineKind, engine_factory},
    intake::load_payloads,
    orchestrator::{BatchExtractor, ExtractOptions, OutcomeStatus},
    prelude::*,
    progress::ProgressReporter,
    results::{CSV_FILE_NAME, CSV_MIME_TYPE},
    ui::{ProgressConfig, Ui},
};

/// Command-line arguments for the `extract` subcommand.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// Images, directories of images, or base64 `data:` URLs.
    #[clap(value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// A CSV or JSONL file with a `path` column listing more images. Use `-`
    /// for standard input.
    #[clap(long)]
    pub manifest: Option<PathBuf>,

    /// Where to write the extracted codes, one per line. Use `-` for
    /// standard output.
    #[clap(short = 'o', long = "out", default_value = CSV_FILE_NAME)]
    pub output_path: PathBuf,

    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = EngineKind::Tesseract)]
    pub engine: EngineKind,

    /// The recognition language. Overrides `--engine-config`.
    #[clap(short = 'l', long)]
    pub language: Option<String>,

    /// A TOML or JSON file configuring the engine.
    #[clap(long)]
    pub engine_config: Option<PathBuf>,

    /// Give up on any single image after this many seconds.
    #[clap(long)]
    pub timeout_secs: Option<u64>,

    /// Write a JSONL record describing what happened to each image.
    #[clap(long)]
    pub report: Option<PathBuf>,
}

impl ExtractOpts {
    /// Are we writing codes to standard output?
    pub fn writes_to_stdout(&self) -> bool {
        self.output_path == Path::new("-")
    }

    /// Our engine configuration, with command-line overrides applied.
    async fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.engine_config {
            Some(path) => read_json_or_toml::<EngineConfig>(path).await?,
            None => EngineConfig::default(),
        };
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        Ok(config)
    }
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let config = opts.engine_config().await?;
    debug!("Engine config: {:?}", config);

    let payloads = load_payloads(&opts.inputs, opts.manifest.as_deref()).await?;
    if payloads.is_empty() {
        return Err(anyhow!("no input images"));
    }

    // Set up progress reporting.
    let (progress, progress_worker) = ProgressReporter::start();
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🖼️",
            msg: "OCRing images",
            done_msg: "OCRed images",
        },
        payloads.len() as u64,
    );

    let extract_opts = ExtractOptions {
        language: config.language.clone(),
        timeout: opts.timeout_secs.map(Duration::from_secs),
    };
    let mut extractor =
        BatchExtractor::new(engine_factory(opts.engine, config), progress, extract_opts);
    let engine_ui = ui.show_engine_progress(extractor.progress().subscribe());

    let result = extractor
        .extract(pb.wrap_stream(stream::iter(payloads)))
        .await;
    let results = extractor.results().clone();
    debug!("Final progress: {:?}", extractor.progress().state());

    // Tear everything down before reporting errors, so the progress workers
    // can finish.
    extractor.release().await;
    drop(extractor);
    progress_worker.join().await?;
    engine_ui.join().await?;
    let summary = result?;

    // Write our outputs.
    let output_path = if opts.writes_to_stdout() {
        None
    } else {
        Some(opts.output_path.as_path())
    };
    if results.is_empty() {
        warn!("no codes found in any image");
    }
    results.write_csv(output_path).await?;
    info!(
        path = %opts.output_path.display(),
        mime_type = CSV_MIME_TYPE,
        count = results.len(),
        "wrote codes"
    );
    if let Some(report_path) = &opts.report {
        let outcomes = summary
            .outcomes
            .iter()
            .map(|outcome| serde_json::to_value(outcome).context("failed to serialize outcome"))
            .collect::<Vec<_>>();
        write_output(Some(report_path.as_path()), stream::iter(outcomes).boxed()).await?;
    }

    // Show the user what we found.
    for (idx, code) in results.snapshot().iter().enumerate() {
        ui.display_message("🔢", &format!("RESULT {}: {}", idx + 1, code));
    }
    ui.display_message(
        "📊",
        &format!(
            "{} codes found, {} images without a code, {} images could not be recognized",
            summary.count(OutcomeStatus::Ok),
            summary.count(OutcomeStatus::NoCode),
            summary.count(OutcomeStatus::Failed),
        ),
    );
    Ok(())
}
