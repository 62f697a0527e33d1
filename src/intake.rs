//! Turning user-supplied files into image payloads.

use futures::StreamExt as _;
use schemars::JsonSchema;

use crate::{
    async_utils::io::read_jsonl_or_csv,
    data_url::parse_data_url,
    prelude::*,
};

/// Image types we expect an OCR engine to be able to read.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
];

/// One input image, fully loaded into memory.
#[derive(Clone, Debug)]
pub struct ImagePayload {
    /// Where this image came from, for logs and reports.
    pub name: String,

    /// The MIME type of `data`.
    pub mime_type: String,

    /// The encoded image.
    pub data: Vec<u8>,
}

impl ImagePayload {
    /// Build a payload from raw bytes, sniffing the MIME type from the data
    /// and falling back to the name's extension.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = match infer::get(&data) {
            Some(kind) => kind.mime_type().to_owned(),
            None => mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_owned(),
        };
        Self {
            name,
            mime_type,
            data,
        }
    }

    /// Read a payload from a file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {:?}", path))?;
        Ok(Self::from_bytes(path.display().to_string(), data))
    }

    /// Decode a payload from a base64 `data:` URL.
    pub fn from_data_url(name: impl Into<String>, url: &str) -> Result<Self> {
        let name = name.into();
        let (mime_type, data) =
            parse_data_url(url).with_context(|| format!("failed to parse {}", name))?;
        Ok(Self {
            name,
            mime_type,
            data,
        })
    }
}

/// A record in an input manifest.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct ManifestRecord {
    /// The path to an image. Relative paths are resolved against the
    /// directory containing the manifest.
    pub path: PathBuf,
}

/// Load every input image, in order.
///
/// `inputs` may contain image paths, directories (whose files are loaded in
/// name order) and `data:` URLs. Images listed in `manifest` come after all
/// of `inputs`.
#[instrument(level = "debug", skip_all)]
pub async fn load_payloads(
    inputs: &[String],
    manifest: Option<&Path>,
) -> Result<Vec<ImagePayload>> {
    let mut payloads = vec![];
    for (idx, input) in inputs.iter().enumerate() {
        if input.starts_with("data:") {
            payloads.push(ImagePayload::from_data_url(
                format!("input #{}", idx + 1),
                input,
            )?);
            continue;
        }
        let path = Path::new(input);
        if path.is_dir() {
            for file in list_dir(path).await? {
                payloads.push(ImagePayload::from_path(&file).await?);
            }
        } else {
            payloads.push(ImagePayload::from_path(path).await?);
        }
    }

    if let Some(manifest) = manifest {
        // `-` reads the manifest from standard input, relative to the current
        // directory.
        let (source, base_dir) = if manifest == Path::new("-") {
            (None, Path::new(""))
        } else {
            (Some(manifest), manifest.parent().unwrap_or(Path::new("")))
        };
        let mut records = read_jsonl_or_csv(source).await?;
        while let Some(value) = records.next().await {
            let record = serde_json::from_value::<ManifestRecord>(value?)
                .with_context(|| format!("invalid record in {:?}", manifest))?;
            payloads.push(ImagePayload::from_path(&base_dir.join(&record.path)).await?);
        }
    }

    debug!(count = payloads.len(), "loaded input images");
    Ok(payloads)
}

/// List the files in a directory, sorted by name. Subdirectories and hidden
/// files are skipped.
async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {:?}", dir))?;
    let mut files = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to read directory {:?}", dir))?
    {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
