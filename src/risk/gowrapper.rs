//! `GoWrapperResolver` — §4.8.
//!
//! Best-effort resolution of calls into Go's `syscall.Syscall`/
//! `syscall.RawSyscall` wrapper family back to the syscall number each
//! call site passes. Only active when the binary carries a `.gopclntab`
//! section with a magic this resolver recognizes (Go 1.16+ pcln header);
//! any other binary, or one missing the section entirely, makes the
//! resolver report itself unavailable rather than erroring the analysis.

use super::decoder::MachineCodeDecoder;
use super::elf::LoadedElf;

const GOPCLNTAB_MAGIC_116: [u8; 4] = [0xFA, 0xFF, 0xFF, 0xFF];
const GOPCLNTAB_MAGIC_118: [u8; 4] = [0xFB, 0xFF, 0xFF, 0xFF];

const WRAPPER_NAMES: &[&str] = &[
    "syscall.Syscall",
    "syscall.Syscall6",
    "syscall.RawSyscall",
    "syscall.RawSyscall6",
];

#[derive(Debug, Clone)]
pub struct ResolvedWrapperCall {
    /// `.text`-relative offset of the call instruction itself.
    pub call_site_offset: usize,
    /// The syscall number found by the backward scan, if any.
    pub immediate: Option<i64>,
}

/// Whether this binary's `.gopclntab` (if present) is a layout this
/// resolver understands.
#[must_use]
pub fn is_available(elf: &LoadedElf) -> bool {
    match &elf.gopclntab {
        Some(data) => {
            data.len() >= 4
                && (data[0..4] == GOPCLNTAB_MAGIC_116 || data[0..4] == GOPCLNTAB_MAGIC_118)
        }
        None => false,
    }
}

fn wrapper_ranges(elf: &LoadedElf) -> Vec<(u64, u64)> {
    WRAPPER_NAMES
        .iter()
        .filter_map(|name| elf.symbols.get(*name))
        .map(|&(start, size)| (start, start + size.max(1)))
        .collect()
}

fn targets_wrapper(target_vaddr: u64, ranges: &[(u64, u64)]) -> bool {
    ranges.iter().any(|&(start, end)| target_vaddr >= start && target_vaddr < end)
}

/// Decodes the whole of `.text` once, then finds call instructions
/// targeting a known wrapper range. For each, walks backward within the
/// caller's basic block (bounded by `scan_window` instructions) looking
/// for an immediate write to the first-argument register; the call is
/// left unresolved (`immediate: None`) if the walk hits a control-flow
/// boundary or the window first.
#[must_use]
pub fn resolve_calls(
    elf: &LoadedElf,
    decoder: &dyn MachineCodeDecoder,
    scan_window: usize,
) -> Vec<ResolvedWrapperCall> {
    let ranges = wrapper_ranges(elf);
    if ranges.is_empty() {
        return Vec::new();
    }

    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < elf.text.len() {
        match decoder.decode(&elf.text, offset) {
            Some(inst) => {
                offset += inst.len.max(1);
                instructions.push(inst);
            }
            None => offset += decoder.instruction_alignment(),
        }
    }

    let mut results = Vec::new();
    for (idx, inst) in instructions.iter().enumerate() {
        let Some(target_offset) = decoder.call_target(inst) else {
            continue;
        };
        let target_vaddr = elf.offset_to_vaddr(target_offset);
        if !targets_wrapper(target_vaddr, &ranges) {
            continue;
        }

        let mut immediate = None;
        for (steps, prior) in instructions[..idx].iter().rev().enumerate() {
            if steps >= scan_window {
                break;
            }
            if let Some(value) = decoder.is_immediate_to_first_arg_register(prior) {
                immediate = Some(value);
                break;
            }
            if decoder.is_control_flow(prior) {
                break;
            }
        }

        results.push(ResolvedWrapperCall {
            call_site_offset: inst.offset,
            immediate,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::decoder_x86_64::X86_64Decoder;
    use crate::risk::elf::Architecture;
    use std::collections::HashMap;

    fn elf_with_wrapper_call() -> LoadedElf {
        let mut text = Vec::new();
        text.extend_from_slice(&[0xB8, 0x02, 0x00, 0x00, 0x00]); // mov eax, 2
        text.extend_from_slice(&[0xE8, 0x0A, 0x00, 0x00, 0x00]); // call +10 -> offset 20
        while text.len() < 20 {
            text.push(0xC3);
        }
        text.extend_from_slice(&[0xC3, 0xC3, 0xC3, 0xC3]); // wrapper body placeholder

        let mut symbols = HashMap::new();
        symbols.insert("syscall.Syscall".to_string(), (0x1000 + 20, 4));

        LoadedElf {
            architecture: Architecture::X86_64,
            text,
            text_vaddr: 0x1000,
            gopclntab: Some(vec![0xFB, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]),
            symbols,
        }
    }

    #[test]
    fn recognizes_go_1_18_pcln_magic() {
        let elf = elf_with_wrapper_call();
        assert!(is_available(&elf));
    }

    #[test]
    fn unavailable_without_gopclntab() {
        let mut elf = elf_with_wrapper_call();
        elf.gopclntab = None;
        assert!(!is_available(&elf));
    }

    #[test]
    fn resolves_call_site_to_preceding_immediate() {
        let elf = elf_with_wrapper_call();
        let decoder = X86_64Decoder;
        let calls = resolve_calls(&elf, &decoder, 32);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_site_offset, 5);
        assert_eq!(calls[0].immediate, Some(2));
    }

    #[test]
    fn no_calls_when_no_wrapper_symbols_present() {
        let mut elf = elf_with_wrapper_call();
        elf.symbols.clear();
        let decoder = X86_64Decoder;
        assert!(resolve_calls(&elf, &decoder, 32).is_empty());
    }
}
