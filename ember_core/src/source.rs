//! Source buffer management and the shared file table.
//!
//! The [`SourceManager`] owns the text of every buffer being compiled and
//! resolves byte offsets to line/column coordinates. The [`FileTable`]
//! deduplicates filename and source-map-url strings into small integer ids
//! for the debug info tables; it is shared by every function compiled into
//! one module, so it is guarded by a lock. Callers compiling functions in
//! parallel must go through that lock; everything else in the backend is
//! owned by a single function compilation.

use crate::span::Span;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies a registered source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// A resolved 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCoords {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// A single registered source buffer with a precomputed line-start table.
pub struct SourceBuffer {
    name: Arc<str>,
    source_map_url: Option<Arc<str>>,
    /// Byte offsets at which each line starts. `line_starts[0] == 0`.
    line_starts: Vec<u32>,
    len: u32,
}

impl SourceBuffer {
    /// Create a buffer from its name and full text.
    pub fn new(
        name: impl Into<Arc<str>>,
        text: &str,
        source_map_url: Option<Arc<str>>,
    ) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            name: name.into(),
            source_map_url,
            line_starts,
            len: text.len() as u32,
        }
    }

    /// The buffer's identifier (usually its filename).
    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The `//# sourceMappingURL` associated with this buffer, if any.
    #[inline]
    pub fn source_map_url(&self) -> Option<&Arc<str>> {
        self.source_map_url.as_ref()
    }

    /// Resolve a byte offset into 1-based line/column coordinates.
    ///
    /// Returns `None` for offsets past the end of the buffer.
    pub fn coords(&self, offset: u32) -> Option<SourceCoords> {
        if offset > self.len {
            return None;
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Some(SourceCoords {
            line: line as u32 + 1,
            column: offset - self.line_starts[line] + 1,
        })
    }
}

impl fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBuffer")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

/// Registry of all source buffers for one compilation.
#[derive(Debug, Default)]
pub struct SourceManager {
    buffers: Vec<SourceBuffer>,
}

impl SourceManager {
    /// Create an empty source manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer and return its id.
    pub fn add_buffer(&mut self, buffer: SourceBuffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(buffer);
        id
    }

    /// Get a registered buffer.
    pub fn buffer(&self, id: BufferId) -> &SourceBuffer {
        &self.buffers[id.0 as usize]
    }

    /// Resolve the start of a span in a buffer to line/column coordinates.
    pub fn find_coords(&self, id: BufferId, span: Span) -> Option<SourceCoords> {
        self.buffers.get(id.0 as usize)?.coords(span.start)
    }
}

/// Sentinel id meaning "no source map url recorded".
pub const INVALID_SOURCE_MAP_ID: u32 = u32::MAX;

#[derive(Default)]
struct FileTableInner {
    names: Vec<Arc<str>>,
    ids: FxHashMap<Arc<str>, u32>,
}

/// Module-wide table of filenames and source-map urls.
///
/// Ids handed out here end up in debug info records of every function in
/// the module, so the table outlives any single function compilation and
/// is shared behind a lock.
#[derive(Default)]
pub struct FileTable {
    inner: RwLock<FileTableInner>,
}

impl FileTable {
    /// Create an empty file table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a filename, returning its id. Repeated additions of the same
    /// name return the same id.
    pub fn add_filename(&self, name: &str) -> u32 {
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.ids.get(name) {
                return id;
            }
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }
        let id = inner.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        inner.names.push(name.clone());
        inner.ids.insert(name, id);
        id
    }

    /// Number of interned filenames.
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the interned names in id order.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.inner.read().names.clone()
    }
}

impl fmt::Debug for FileTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTable")
            .field("len", &self.len())
            .finish()
    }
}
