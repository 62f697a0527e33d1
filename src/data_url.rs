//! Decoding `data:` URLs.

use std::sync::LazyLock;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use regex::Regex;

use crate::prelude::*;

/// Regex for parsing a `data:` URL. Parameters other than `base64`, such as
/// `charset`, are accepted and ignored.
static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:(?P<mime_type>[^;,]+)(?:;[^;,=]+=[^;,]*)*;base64,(?P<data>.*)$")
        .expect("failed to compile regex")
});

/// Parse a base64 `data:` URL into a MIME type and decoded data.
pub fn parse_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let caps = DATA_URL_RE
        .captures(data_url)
        .ok_or_else(|| anyhow!("not a base64 data: URL"))?;
    let mime_type = caps["mime_type"].to_owned();
    let data = BASE64_STANDARD
        .decode(caps["data"].trim())
        .context("invalid base64 in data: URL")?;
    Ok((mime_type, data))
}
