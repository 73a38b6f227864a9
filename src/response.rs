use std::io::Read;

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use reqwest::{
    header::{self, HeaderMap},
    StatusCode, Url, Version,
};
use serde::de::DeserializeOwned;

use crate::{HttpError, Result};

/// Status line and headers of a received response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// URL of the last hop, after redirects.
    pub url: Url,
}

impl ResponseHead {
    pub(crate) fn new(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
            url: response.url().clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(crate) fn is_gzip(&self) -> bool {
        self.headers
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"))
    }
}

pub(crate) fn gunzip(raw: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(raw)
        .read_to_end(&mut decoded)
        .map_err(|err| HttpError::Decode(format!("invalid gzip body: {err}")))?;
    Ok(Bytes::from(decoded))
}

pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|err| HttpError::Decode(format!("invalid JSON response: {err}")))
}

pub(crate) fn decode_xml<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(body)
        .map_err(|err| HttpError::Decode(format!("XML response is not UTF-8: {err}")))?;
    quick_xml::de::from_str(text)
        .map_err(|err| HttpError::Decode(format!("invalid XML response: {err}")))
}
