//! Source manager
//!
//! Owns the immutable text of every file handed to the compiler and
//! answers position queries against it. Line boundaries are computed
//! once at load time so that `(line, column)` lookups are a binary
//! search instead of a scan.

use crate::span::{Position, SourceId, Span};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors produced while loading source text
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open '{path}': {cause}")]
    NotFound {
        path: String,
        cause: std::io::Error,
    },

    #[error("'{path}' is not valid UTF-8")]
    Decoding { path: String },
}

/// One source file registered with the manager
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Handle of this file
    pub id: SourceId,
    /// Path on disk, or a unique virtual URL for synthesized sources
    pub url: String,
    /// The complete text
    pub text: String,
    /// Byte offset of the first character of each line
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(id: SourceId, url: String, text: String) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            id,
            url,
            text,
            line_starts,
        }
    }

    /// Number of lines in the file (a trailing newline opens a final
    /// empty line)
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 0-based index of the line containing `byte`
    pub fn line_index(&self, byte: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= byte) - 1
    }

    /// `(line, column)` of a byte offset, both 1-based
    pub fn position(&self, byte: usize) -> Position {
        let line = self.line_index(byte);
        Position::new(line as u32 + 1, (byte - self.line_starts[line]) as u32 + 1)
    }

    /// The text of the line containing `byte`, without its terminator
    pub fn line_text(&self, byte: usize) -> &str {
        let line = self.line_index(byte);
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .map(|&next| next - 1)
            .unwrap_or(self.text.len());
        &self.text[start..end]
    }

    /// A span covering the end of the file
    pub fn eof_span(&self) -> Span {
        Span::empty(self.id, self.text.len())
    }
}

/// The source manager: a registry of loaded files
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a file from disk
    pub fn load(&mut self, path: &Path) -> Result<SourceId, SourceError> {
        let bytes = fs::read(path).map_err(|cause| SourceError::NotFound {
            path: path.display().to_string(),
            cause,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| SourceError::Decoding {
            path: path.display().to_string(),
        })?;
        Ok(self.insert(path.display().to_string(), text))
    }

    /// Register in-memory text under a unique virtual URL
    pub fn load_synthesized(&mut self, name: &str, text: impl Into<String>) -> SourceId {
        let url = format!("synth://{}/{}", self.files.len(), name);
        self.insert(url, text.into())
    }

    fn insert(&mut self, url: String, text: String) -> SourceId {
        let id = SourceId(self.files.len() as u32);
        self.files.push(SourceFile::new(id, url, text));
        id
    }

    /// Look up a registered file
    pub fn get(&self, id: SourceId) -> &SourceFile {
        &self.files[id.0 as usize]
    }

    /// `(line, column)` for a span's start
    pub fn position(&self, span: Span) -> Position {
        self.get(span.source).position(span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(text: &str) -> (SourceMap, SourceId) {
        let mut map = SourceMap::new();
        let id = map.load_synthesized("test.vl", text);
        (map, id)
    }

    #[test]
    fn test_position_lookup() {
        let (map, id) = single("abc\ndef\n");
        let file = map.get(id);
        assert_eq!(file.position(0), Position::new(1, 1));
        assert_eq!(file.position(2), Position::new(1, 3));
        assert_eq!(file.position(4), Position::new(2, 1));
        assert_eq!(file.position(6), Position::new(2, 3));
    }

    #[test]
    fn test_line_text() {
        let (map, id) = single("val x = 1\nval y = 2");
        let file = map.get(id);
        assert_eq!(file.line_text(0), "val x = 1");
        assert_eq!(file.line_text(12), "val y = 2");
    }

    #[test]
    fn test_synthesized_urls_are_unique() {
        let mut map = SourceMap::new();
        let a = map.load_synthesized("a.vl", "x");
        let b = map.load_synthesized("a.vl", "y");
        assert_ne!(map.get(a).url, map.get(b).url);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut map = SourceMap::new();
        let err = map.load(Path::new("/nonexistent/source.vl"));
        assert!(matches!(err, Err(SourceError::NotFound { .. })));
    }
}
