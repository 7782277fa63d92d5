//! Loaded sources and their assigned [`FileId`]s.

use std::path::{Path, PathBuf};

use crate::span::FileId;

/// Holds every source text loaded during one compilation.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<(PathBuf, String)>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    pub fn add(&mut self, path: PathBuf, src: String) -> FileId {
        let id = self.files.len() as u32;
        self.files.push((path, src));
        FileId(id)
    }

    pub fn path(&self, id: FileId) -> Option<&Path> {
        self.files.get(id.0 as usize).map(|(p, _)| p.as_path())
    }

    pub fn get(&self, id: FileId) -> Option<&str> {
        self.files.get(id.0 as usize).map(|(_, s)| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Convert a byte offset to a 0-based (line, column) pair.
    ///
    /// Columns count bytes. Offsets past the end of the file yield `None`.
    pub fn line_col(&self, id: FileId, byte: u32) -> Option<(usize, usize)> {
        let src = self.get(id)?;
        let byte = byte as usize;
        if byte > src.len() {
            return None;
        }
        let before = &src.as_bytes()[..byte];
        let line = before.iter().filter(|b| **b == b'\n').count();
        let col = match before.iter().rposition(|b| *b == b'\n') {
            Some(nl) => byte - nl - 1,
            None => byte,
        };
        Some((line, col))
    }

    pub fn line_str(&self, id: FileId, line: usize) -> Option<&str> {
        self.get(id)?.lines().nth(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_zero() {
        let mut sm = SourceMap::new();
        let id = sm.add(PathBuf::from("a.clarity"), "ab\ncd\n".to_string());
        assert_eq!(sm.line_col(id, 0), Some((0, 0)));
        assert_eq!(sm.line_col(id, 4), Some((1, 1)));
        assert_eq!(sm.line_col(id, 6), Some((2, 0)));
        assert_eq!(sm.line_col(id, 7), None);
        assert_eq!(sm.line_str(id, 1), Some("cd"));
    }
}
