//! Two-pass syscall risk analyzer — §4.8.
//!
//! Shares one scan pipeline across both architectures; `MachineCodeDecoder`
//! and `SyscallNumberTable::lookup` are the only arch-specific plug-in
//! points. Pass 1 walks backward from each syscall instruction for an
//! immediate syscall number; pass 2 resolves Go wrapper calls the same way
//! against the first-argument register.

use serde::{Deserialize, Serialize};

use super::decoder::MachineCodeDecoder;
use super::decoder_aarch64::Aarch64Decoder;
use super::decoder_x86_64::X86_64Decoder;
use super::elf::{Architecture, LoadedElf};
use super::gowrapper;
use super::{syscalls_aarch64, syscalls_x86_64};

pub const SCHEMA_VERSION: u32 = 1;

/// A syscall number's name and network-capability flag, as resolved by a
/// `SyscallNumberTable`. Unknown numbers still produce one of these
/// (`name = "unknown"`), so the caller always has something to log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallInfo {
    pub name: String,
    pub is_network: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    Immediate,
    GoWrapper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSyscall {
    pub number: i64,
    pub name: String,
    pub is_network: bool,
    /// Runtime virtual address of the syscall (pass 1) or call (pass 2)
    /// instruction, not a `.text`-relative offset, so it stays meaningful
    /// once written to the on-disk result store.
    pub location: u64,
    pub method: DetectionMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallAnalysisResult {
    pub schema_version: u32,
    pub architecture_tag: String,
    pub detected: Vec<DetectedSyscall>,
    pub has_unknown: bool,
    pub is_high_risk: bool,
}

impl SyscallAnalysisResult {
    #[must_use]
    pub fn any_network(&self) -> bool {
        self.detected.iter().any(|d| d.is_network)
    }
}

/// Tunable scan bounds. Defaults match SPEC_FULL.md's stated budgets.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisConfig {
    /// How many prior instructions pass 1 walks backward before giving up
    /// on a syscall instruction (`has_unknown = true`).
    pub backward_scan_window: usize,
    /// How many prior instructions pass 2 walks backward from a resolved
    /// wrapper call before giving up on it.
    pub go_wrapper_scan_window: usize,
    /// A hard cap on instructions decoded from one `.text` section;
    /// exceeding it does not fail the scan, it marks the remainder
    /// unknown and logs a warning.
    pub max_scan_instructions: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            backward_scan_window: 32,
            go_wrapper_scan_window: 64,
            max_scan_instructions: 2_000_000,
        }
    }
}

fn architecture_tag(architecture: Architecture) -> &'static str {
    match architecture {
        Architecture::X86_64 => "x86_64",
        Architecture::Aarch64 => "aarch64",
    }
}

/// Analyze `elf` with the default scan bounds.
#[must_use]
pub fn analyze(elf: &LoadedElf) -> SyscallAnalysisResult {
    analyze_with_config(elf, &AnalysisConfig::default())
}

#[must_use]
pub fn analyze_with_config(elf: &LoadedElf, config: &AnalysisConfig) -> SyscallAnalysisResult {
    let decoder: Box<dyn MachineCodeDecoder> = match elf.architecture {
        Architecture::X86_64 => Box::new(X86_64Decoder),
        Architecture::Aarch64 => Box::new(Aarch64Decoder),
    };
    let lookup: fn(i64) -> SyscallInfo = match elf.architecture {
        Architecture::X86_64 => syscalls_x86_64::lookup,
        Architecture::Aarch64 => syscalls_aarch64::lookup,
    };

    let mut instructions = Vec::new();
    let mut offset = 0;
    let mut truncated = false;
    while offset < elf.text.len() {
        if instructions.len() >= config.max_scan_instructions {
            truncated = true;
            break;
        }
        match decoder.decode(&elf.text, offset) {
            Some(inst) => {
                offset += inst.len.max(1);
                instructions.push(inst);
            }
            None => offset += decoder.instruction_alignment(),
        }
    }
    if truncated {
        tracing::warn!(
            architecture = architecture_tag(elf.architecture),
            budget = config.max_scan_instructions,
            "risk analyzer scan budget exceeded; remainder of .text marked unknown"
        );
    }

    let mut detected = Vec::new();
    let mut has_unknown = truncated;

    // Pass 1: direct syscalls.
    for (idx, inst) in instructions.iter().enumerate() {
        if !decoder.is_syscall_instruction(inst) {
            continue;
        }
        let mut found = None;
        for (steps, prior) in instructions[..idx].iter().rev().enumerate() {
            if steps >= config.backward_scan_window {
                break;
            }
            if let Some(value) = decoder.is_immediate_to_syscall_number_register(prior) {
                found = Some(value);
                break;
            }
            if decoder.modifies_syscall_number_register(prior) {
                break; // indirect write to the syscall-number register
            }
            if decoder.is_control_flow(prior) {
                break;
            }
        }
        match found {
            Some(number) => {
                let info = lookup(number);
                detected.push(DetectedSyscall {
                    number,
                    name: info.name,
                    is_network: info.is_network,
                    location: elf.offset_to_vaddr(inst.offset),
                    method: DetectionMethod::Immediate,
                });
            }
            None => has_unknown = true,
        }
    }

    // Pass 2: Go wrapper calls.
    if gowrapper::is_available(elf) {
        for call in gowrapper::resolve_calls(elf, decoder.as_ref(), config.go_wrapper_scan_window) {
            match call.immediate {
                Some(number) => {
                    let info = lookup(number);
                    detected.push(DetectedSyscall {
                        number,
                        name: info.name,
                        is_network: info.is_network,
                        location: elf.offset_to_vaddr(call.call_site_offset),
                        method: DetectionMethod::GoWrapper,
                    });
                }
                None => has_unknown = true,
            }
        }
    }

    let is_high_risk = has_unknown || detected.iter().any(|d| d.is_network);

    SyscallAnalysisResult {
        schema_version: SCHEMA_VERSION,
        architecture_tag: architecture_tag(elf.architecture).to_string(),
        detected,
        has_unknown,
        is_high_risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn x86_elf(text: Vec<u8>) -> LoadedElf {
        LoadedElf {
            architecture: Architecture::X86_64,
            text,
            text_vaddr: 0x1000,
            gopclntab: None,
            symbols: HashMap::new(),
        }
    }

    fn aarch64_elf(text: Vec<u8>) -> LoadedElf {
        LoadedElf {
            architecture: Architecture::Aarch64,
            text,
            text_vaddr: 0x1000,
            gopclntab: None,
            symbols: HashMap::new(),
        }
    }

    #[test]
    fn detects_direct_network_syscall_on_x86_64() {
        let mut text = vec![0xB8, 0x29, 0x00, 0x00, 0x00]; // mov eax, 41 (socket)
        text.extend_from_slice(&[0x0F, 0x05]); // syscall
        let elf = x86_elf(text);
        let result = analyze(&elf);
        assert_eq!(result.detected.len(), 1);
        assert_eq!(result.detected[0].number, 41);
        assert_eq!(result.detected[0].name, "socket");
        assert!(result.detected[0].is_network);
        assert!(result.is_high_risk);
        assert!(!result.has_unknown);
    }

    #[test]
    fn indirect_write_to_syscall_register_is_unknown() {
        // mov ecx, 0x10 -- an immediate move, but not into eax/rax, so the
        // decoder classifies it as `MovOtherAx` (an indirect-from-the-
        // analyzer's-perspective write) rather than a resolved immediate.
        let mut text = vec![0xB9, 0x10, 0x00, 0x00, 0x00];
        text.extend_from_slice(&[0x0F, 0x05]); // syscall
        let elf = x86_elf(text);
        let result = analyze(&elf);
        assert!(result.has_unknown);
        assert!(result.is_high_risk);
    }

    #[test]
    fn control_flow_boundary_before_immediate_is_unknown() {
        let mut text = vec![0xB8, 0x29, 0x00, 0x00, 0x00]; // mov eax, 41
        text.push(0xC3); // ret -- boundary
        text.extend_from_slice(&[0x0F, 0x05]); // syscall
        let elf = x86_elf(text);
        let result = analyze(&elf);
        assert!(result.has_unknown);
    }

    #[test]
    fn detects_direct_syscall_on_aarch64() {
        let mut text = Vec::new();
        let movz_x8 = 0xD280_0000u32 | (198 << 5) | 8; // movz x8, #198 (socket)
        text.extend_from_slice(&movz_x8.to_le_bytes());
        text.extend_from_slice(&0xD401_0001u32.to_le_bytes()); // svc #0
        let elf = aarch64_elf(text);
        let result = analyze(&elf);
        assert_eq!(result.detected.len(), 1);
        assert_eq!(result.detected[0].number, 198);
        assert!(result.detected[0].is_network);
        assert!(result.is_high_risk);
    }

    #[test]
    fn no_syscalls_is_low_risk() {
        let text = vec![0xC3]; // just ret
        let elf = x86_elf(text);
        let result = analyze(&elf);
        assert!(result.detected.is_empty());
        assert!(!result.has_unknown);
        assert!(!result.is_high_risk);
    }

    #[test]
    fn known_non_network_syscall_alone_is_not_high_risk() {
        let mut text = vec![0xB8, 0x3B, 0x00, 0x00, 0x00]; // mov eax, 59 (execve)
        text.extend_from_slice(&[0x0F, 0x05]);
        let elf = x86_elf(text);
        let result = analyze(&elf);
        assert_eq!(result.detected[0].name, "execve");
        assert!(!result.detected[0].is_network);
        assert!(!result.is_high_risk);
    }
}
