//! Document codecs
//!
//! The schema core never decides how a media plan is stored. It only needs
//! bytes turned into a [`Document`] for `validate_file`, and that job belongs
//! to a [`DocumentCodec`].

use std::fs;
use std::path::Path;

use crate::document::Document;
use crate::error::{Result, SchemaError};

/// Converts between raw bytes and documents
pub trait DocumentCodec: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn decode(&self, bytes: &[u8]) -> Result<Document>;

    fn encode(&self, document: &Document) -> Result<Vec<u8>>;

    /// Read and decode a file
    ///
    /// Both I/O and decode failures are reported as [`SchemaError::FileRead`].
    fn read_file(&self, path: &Path) -> Result<Document> {
        let file_read = |reason: String| SchemaError::FileRead {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).map_err(|err| file_read(err.to_string()))?;
        self.decode(&bytes).map_err(|err| file_read(err.to_string()))
    }
}

/// JSON media plan files
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indent encoded output
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl DocumentCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|err| SchemaError::Decode(err.to_string()))?;
        Document::from_value(value)
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(document)?
        } else {
            serde_json::to_vec(document)?
        };
        Ok(bytes)
    }
}
