use std::{collections::BTreeMap, path::PathBuf};

pub(crate) const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// Files uploaded as multipart parts, keyed by form field name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attachments {
    files: BTreeMap<String, PathBuf>,
    content_type: Option<String>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` under `field`; a second call for the same field
    /// replaces the first.
    pub fn insert(&mut self, field: impl Into<String>, path: impl Into<PathBuf>) {
        self.files.insert(field.into(), path.into());
    }

    /// Overrides the part content type for every attachment.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or(DEFAULT_FILE_CONTENT_TYPE)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathBuf)> {
        self.files.iter().map(|(field, path)| (field.as_str(), path))
    }
}
