//! Static Risk Analyzer — §4.8.
//!
//! Ties together the hand-rolled ELF reader, the per-architecture
//! instruction decoders and syscall tables, the Go wrapper resolver, and
//! the on-disk result cache behind one entry point the Executor calls
//! after the File Validator has already hashed the binary's bytes.

pub mod analyzer;
pub mod cache;
pub mod decoder;
pub mod decoder_aarch64;
pub mod decoder_x86_64;
pub mod elf;
pub mod gowrapper;
pub mod syscalls_aarch64;
pub mod syscalls_x86_64;

pub use analyzer::{AnalysisConfig, DetectedSyscall, DetectionMethod, SyscallAnalysisResult, SyscallInfo};
pub use cache::AnalysisCache;
pub use elf::{Architecture, LoadedElf};

use std::path::Path;

use crate::core::error::Result;

/// Analyzes `bytes` (the already hash-verified contents of the binary at
/// `target`), consulting `cache` first and persisting a fresh result under
/// `(target, digest_hex)` on a miss. `bytes` must be exactly what the File
/// Validator hashed — this function never re-reads the file.
pub fn analyze_binary(
    bytes: &[u8],
    target: &Path,
    digest_hex: &str,
    cache: &AnalysisCache,
    config: &AnalysisConfig,
) -> Result<SyscallAnalysisResult> {
    if let Some(cached) = cache.get(target, digest_hex)? {
        return Ok(cached);
    }

    let loaded = elf::parse(bytes)?;
    let result = analyzer::analyze_with_config(&loaded, config);
    cache.put(target, digest_hex, &result)?;
    Ok(result)
}
