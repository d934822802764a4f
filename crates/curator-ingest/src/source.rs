//! File inputs accepted by the ingestion actor.
//!
//! An input only has to yield its bytes. Content type, original file name and
//! a durable on-disk path are optional capabilities; the actor checks for each
//! one explicitly.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Anything the actor can ingest.
pub trait IngestSource: Send {
    /// Read the full content.
    fn read_bytes(&mut self) -> io::Result<Vec<u8>>;

    /// Declared MIME type, if the input carries one.
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// Client-supplied file name, if the input carries one.
    fn original_filename(&self) -> Option<&str> {
        None
    }

    /// A path that stays valid after the caller returns.
    fn durable_path(&self) -> Option<&Path> {
        None
    }
}

/// Bytes received from an upload, held in memory.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    content: Vec<u8>,
    content_type: Option<String>,
    original_filename: Option<String>,
}

impl UploadedFile {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }
}

impl IngestSource for UploadedFile {
    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.content.clone())
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }
}

/// A file already on local disk. Exposes its path as durable while it exists.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    content_type: Option<String>,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl IngestSource for LocalFile {
    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn original_filename(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    fn durable_path(&self) -> Option<&Path> {
        if self.path.exists() {
            Some(&self.path)
        } else {
            None
        }
    }
}

/// A readable stream with no backing path, e.g. a request body.
pub struct StreamSource<R> {
    reader: R,
    content_type: Option<String>,
    original_filename: Option<String>,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            content_type: None,
            original_filename: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }
}

impl<R: Read + Send> IngestSource for StreamSource<R> {
    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn original_filename(&self) -> Option<&str> {
        self.original_filename.as_deref()
    }
}
