//! Collected codes and the CSV export format.

use tokio::io::AsyncWriteExt as _;

use crate::{async_utils::io::create_writer, prelude::*};

/// Default file name for exported codes.
pub const CSV_FILE_NAME: &str = "ocr_results.csv";

/// MIME type of exported codes.
pub const CSV_MIME_TYPE: &str = "text/csv";

/// Codes extracted during a run, in the order their images were processed.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    codes: Vec<String>,
}

impl ResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all codes from a previous run.
    pub fn reset(&mut self) {
        self.codes.clear();
    }

    /// Add a code to the end of the list.
    pub fn append(&mut self, code: impl Into<String>) {
        self.codes.push(code.into());
    }

    /// The codes collected so far.
    pub fn snapshot(&self) -> &[String] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Render our codes as CSV: one code per line, no header, and no
    /// trailing newline.
    pub fn to_csv(&self) -> String {
        self.codes.join("\n")
    }

    /// Write [`Self::to_csv`] to a file, or to standard output if `path` is
    /// `None`.
    #[instrument(level = "debug", skip(self))]
    pub async fn write_csv(&self, path: Option<&Path>) -> Result<()> {
        let mut wtr = create_writer(path).await?;
        wtr.write_all(self.to_csv().as_bytes())
            .await
            .context("failed to write codes")?;
        wtr.flush().await.context("failed to flush codes")?;
        Ok(())
    }
}
