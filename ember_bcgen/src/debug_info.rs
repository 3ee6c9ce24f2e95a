//! Debug and source-map location emission.
//!
//! During selection every instruction picked by the configured verbosity
//! gets a `DebugMarker` relocation. Once relaxation settles the
//! addresses, the emitter resolves each marked instruction's span to
//! `(line, column, file id, source map url id)` and appends a record
//! keyed by the final address.
//!
//! File and source-map-url ids come from the module-wide [`FileTable`].
//! Lookups go through a single-entry cache keyed by source buffer:
//! consecutive instructions almost always share a buffer, so the hash
//! lookup only runs when the buffer changes.

use crate::ir::Function;
use crate::reloc::{RelocKind, Relocation};
use ember_core::source::INVALID_SOURCE_MAP_ID;
use ember_core::{BufferId, FileTable, SourceManager};

/// How much location information to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugInfoLevel {
    /// No location records.
    #[default]
    None,
    /// Records only for instructions that can throw.
    Throwing,
    /// Records for every located instruction, enough for source maps.
    SourceMap,
    /// Source-map records plus statement indices and variable names.
    Full,
}

impl DebugInfoLevel {
    /// Whether any location records are emitted at all.
    #[inline]
    pub fn emits_locations(self) -> bool {
        !matches!(self, DebugInfoLevel::None)
    }
}

/// One resolved debug location record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSourceLocation {
    /// Final bytecode address of the instruction.
    pub address: u32,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
    /// Filename id in the module file table.
    pub file_id: u32,
    /// Source-map-url id, or [`INVALID_SOURCE_MAP_ID`].
    pub source_map_url_id: u32,
    /// Statement index (full debug info only, 0 otherwise).
    pub statement: u32,
}

/// Single-entry most-recently-used cache of per-buffer file table ids.
#[derive(Debug, Default)]
struct DebugIdCache {
    buffer: Option<BufferId>,
    file_id: u32,
    source_map_url_id: u32,
}

/// Resolves debug markers into location records.
#[derive(Debug)]
pub struct DebugEmitter<'a> {
    sources: &'a SourceManager,
    files: &'a FileTable,
    cache: DebugIdCache,
    strip_source_map_urls: bool,
}

impl<'a> DebugEmitter<'a> {
    /// Create an emitter over the module's source state.
    pub fn new(
        sources: &'a SourceManager,
        files: &'a FileTable,
        strip_source_map_urls: bool,
    ) -> Self {
        Self {
            sources,
            files,
            cache: DebugIdCache::default(),
            strip_source_map_urls,
        }
    }

    /// Refresh the id cache if `buffer` differs from the cached one.
    fn buffer_ids(&mut self, buffer: BufferId) -> (u32, u32) {
        if self.cache.buffer != Some(buffer) {
            let source = self.sources.buffer(buffer);
            self.cache.file_id = self.files.add_filename(source.name());
            self.cache.source_map_url_id = match source.source_map_url() {
                Some(url) if !self.strip_source_map_urls => self.files.add_filename(url),
                _ => INVALID_SOURCE_MAP_ID,
            };
            self.cache.buffer = Some(buffer);
        }
        (self.cache.file_id, self.cache.source_map_url_id)
    }

    /// Resolve every `DebugMarker` into a location record.
    ///
    /// Relocation offsets must already be final, so this runs after
    /// relaxation.
    pub fn emit(
        &mut self,
        func: &Function,
        level: DebugInfoLevel,
        relocations: &[Relocation],
    ) -> Vec<DebugSourceLocation> {
        let Some(buffer) = func.buffer else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for reloc in relocations {
            if reloc.kind != RelocKind::DebugMarker {
                continue;
            }
            let instr = func.instr(reloc.instr());
            let span = instr
                .span
                .expect("debug markers are only placed on located instructions");
            let Some(coords) = self.sources.find_coords(buffer, span) else {
                continue;
            };
            let (file_id, source_map_url_id) = self.buffer_ids(buffer);
            records.push(DebugSourceLocation {
                address: reloc.offset,
                line: coords.line,
                column: coords.column,
                file_id,
                source_map_url_id,
                statement: if level == DebugInfoLevel::Full {
                    instr.statement
                } else {
                    0
                },
            });
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Literal, Type};
    use crate::reloc::RelocTarget;
    use ember_core::{SourceBuffer, Span};

    fn fixture() -> (SourceManager, FileTable, Function, Vec<Relocation>) {
        let mut sources = SourceManager::new();
        let buf = sources.add_buffer(SourceBuffer::new(
            "mod.js",
            "let a = 1;\nlet b = 2;\n",
            Some("mod.js.map".into()),
        ));
        let files = FileTable::new();

        let mut func = Function::new("t", 0);
        func.buffer = Some(buf);
        let i0 = func.add_instr(
            func.entry,
            InstrKind::LoadConst(Literal::Number(1.0)),
            Type::Number,
            Some(Span::new(4, 5)),
        );
        let i1 = func.add_instr(
            func.entry,
            InstrKind::LoadConst(Literal::Number(2.0)),
            Type::Number,
            Some(Span::new(15, 16)),
        );
        func.instr_mut(i1).statement = 2;
        func.add_instr(func.entry, InstrKind::Ret(i1), Type::Any, None);

        let relocs = vec![
            Relocation {
                offset: 0,
                kind: RelocKind::DebugMarker,
                target: RelocTarget::Instr(i0),
            },
            Relocation {
                offset: 3,
                kind: RelocKind::DebugMarker,
                target: RelocTarget::Instr(i1),
            },
        ];
        (sources, files, func, relocs)
    }

    #[test]
    fn test_records_carry_addresses_and_coords() {
        let (sources, files, func, relocs) = fixture();
        let mut emitter = DebugEmitter::new(&sources, &files, false);
        let records = emitter.emit(&func, DebugInfoLevel::SourceMap, &relocs);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, 0);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[0].column, 5);
        assert_eq!(records[1].address, 3);
        assert_eq!(records[1].line, 2);
        assert_eq!(records[1].column, 5);
        // SourceMap level does not record statements.
        assert_eq!(records[1].statement, 0);
        // Both records share the cached ids.
        assert_eq!(records[0].file_id, records[1].file_id);
        assert_ne!(records[0].source_map_url_id, INVALID_SOURCE_MAP_ID);
    }

    #[test]
    fn test_full_level_records_statements() {
        let (sources, files, func, relocs) = fixture();
        let mut emitter = DebugEmitter::new(&sources, &files, false);
        let records = emitter.emit(&func, DebugInfoLevel::Full, &relocs);
        assert_eq!(records[0].statement, 0);
        assert_eq!(records[1].statement, 2);
    }

    #[test]
    fn test_strip_source_map_urls() {
        let (sources, files, func, relocs) = fixture();
        let mut emitter = DebugEmitter::new(&sources, &files, true);
        let records = emitter.emit(&func, DebugInfoLevel::SourceMap, &relocs);
        assert_eq!(records[0].source_map_url_id, INVALID_SOURCE_MAP_ID);
        // The filename is still interned; only the map url is stripped.
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_function_without_buffer_emits_nothing() {
        let (sources, files, mut func, relocs) = fixture();
        func.buffer = None;
        let mut emitter = DebugEmitter::new(&sources, &files, false);
        assert!(emitter
            .emit(&func, DebugInfoLevel::Full, &relocs)
            .is_empty());
    }
}
