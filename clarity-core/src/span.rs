//! Source locations.
//!
//! Every token, AST node, typed expression and diagnostic carries a
//! [`Span`]. Offsets are byte offsets into the file identified by
//! [`FileId`]; line/column conversion lives in the
//! [`SourceMap`](crate::source_map::SourceMap).

use core::fmt;

/// Identifier of one loaded source file (the `sourceId` of a diagnostic span).
///
/// Ids are handed out in load order by the resolver. Single-source
/// compilation always uses `FileId(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A half-open byte range `[start, end)` within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub file_id: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: FileId, start: u32, end: u32) -> Span {
        Span {
            file_id,
            start,
            end,
        }
    }

    /// Zero-width span at `pos`, used for "expected X here" reports at EOF.
    pub fn point(file_id: FileId, pos: u32) -> Span {
        Span::new(file_id, pos, pos)
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest span covering `self` and `other`.
    ///
    /// Spans from different files cannot be joined; `self` is returned
    /// unchanged in that case.
    pub fn to(self, other: Span) -> Span {
        if self.file_id != other.file_id {
            return self;
        }
        Span::new(
            self.file_id,
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }

    /// Placeholder for diagnostics that have no meaningful location
    /// (internal code-generation failures).
    pub fn dummy() -> Span {
        Span::new(FileId(0), 0, 0)
    }
}
