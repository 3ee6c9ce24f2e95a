//! The one-call compilation entry point and its configuration.

use crate::bytecode::BytecodeFunction;
use crate::debug_info::{DebugEmitter, DebugInfoLevel};
use crate::exceptions::build_exception_table;
use crate::ir::{Function, RegisterFile};
use crate::isel::Selector;
use crate::jump_table::build_jump_table;
use crate::passes::finalize_registers;
use crate::reloc::relax;
use crate::sched::Schedule;
use ember_core::{Diagnostics, EmberResult, FileTable, SourceManager};

/// Per-module code generation settings.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Run the optional register finalization passes.
    pub optimize: bool,
    /// Share property cache slots between accesses to the same name.
    pub reuse_prop_cache: bool,
    /// Debug location verbosity.
    pub debug_info: DebugInfoLevel,
    /// Insert async break checkpoints even without full debug info.
    pub async_break_checks: bool,
    /// Omit variable names from the output record.
    pub strip_debug_names: bool,
    /// Omit source-map url ids from debug records.
    pub strip_source_map_urls: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            reuse_prop_cache: true,
            debug_info: DebugInfoLevel::None,
            async_break_checks: false,
            strip_debug_names: false,
            strip_source_map_urls: false,
        }
    }
}

/// Compile one register-allocated function to its binary record.
///
/// Stages run in a fixed order: register finalization, block scheduling,
/// instruction selection, branch relaxation, then the exception, jump
/// table, and debug emitters over the resolved addresses. Recoverable
/// errors land in `diagnostics` and fail only this function.
pub fn compile_function(
    func: &mut Function,
    regs: &mut RegisterFile,
    options: &CodegenOptions,
    sources: &SourceManager,
    files: &FileTable,
    diagnostics: &mut Diagnostics,
) -> EmberResult<BytecodeFunction> {
    finalize_registers(func, regs, options);

    let sched = Schedule::compute(func);
    let selector = Selector::new(func, regs, options, diagnostics);
    let mut out = selector.run(&sched)?;

    relax(
        &mut out.builder,
        &mut out.relocations,
        &mut out.blocks,
        &mut out.catch_offsets,
        &mut out.switches,
        &out.switch_of,
    );

    for entry in build_exception_table(func, &out.blocks, &out.catch_offsets) {
        out.builder.add_exception_handler(entry);
    }

    build_jump_table(&mut out.builder, &mut out.switches, &out.blocks);

    if options.debug_info.emits_locations() {
        let mut emitter =
            DebugEmitter::new(sources, files, options.strip_source_map_urls);
        for record in emitter.emit(func, options.debug_info, &out.relocations) {
            out.builder.add_debug_location(record);
        }
    }
    if options.debug_info == DebugInfoLevel::Full && !options.strip_debug_names {
        out.builder
            .set_debug_variable_names(func.variable_names.clone());
    }

    out.builder
        .set_highest_read_cache_index(out.cache.highest_read_index());
    out.builder
        .set_highest_write_cache_index(out.cache.highest_write_index());

    Ok(out
        .builder
        .finish(func.name.clone(), regs.frame_size(), func.param_count))
}
