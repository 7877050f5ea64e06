//! `MachineCodeDecoder` — §4.8.
//!
//! A narrow length-disassembler per architecture: just enough instruction
//! classification to find syscalls, trace the syscall-number register back
//! to a constant, and recognize control-flow boundaries. Not a general
//! disassembler.

/// One decoded instruction. `payload` is an opaque arch-specific tag the
/// decoder itself interprets; callers only ever pass it back into the same
/// decoder's query methods.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub len: usize,
    pub payload: InstructionPayload,
}

/// Arch-specific instruction classification, filled in by each decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionPayload {
    X86_64(super::decoder_x86_64::X86Kind),
    Aarch64(super::decoder_aarch64::Arm64Kind),
}

/// Per-architecture instruction classifier plugged into the shared
/// two-pass scan in [`super::analyzer`].
pub trait MachineCodeDecoder {
    /// Decode one instruction starting at `offset`. `None` on a decode
    /// failure (caller advances by `instruction_alignment()` and retries).
    fn decode(&self, bytes: &[u8], offset: usize) -> Option<DecodedInstruction>;

    fn is_syscall_instruction(&self, inst: &DecodedInstruction) -> bool;

    /// Writes to the syscall-number register (`eax`/`rax` on x86_64,
    /// `w8`/`x8` on aarch64), by any means (immediate or indirect).
    fn modifies_syscall_number_register(&self, inst: &DecodedInstruction) -> bool;

    /// `Some(value)` if this instruction sets the syscall-number register
    /// to the constant `value`.
    fn is_immediate_to_syscall_number_register(&self, inst: &DecodedInstruction) -> Option<i64>;

    /// Writes to the first argument register (`rax`/`eax` on x86_64 in Go's
    /// calling convention position, `x0`/`w0` on aarch64), used by the
    /// `GoWrapperResolver` backward scan.
    fn is_immediate_to_first_arg_register(&self, inst: &DecodedInstruction) -> Option<i64>;

    fn is_control_flow(&self, inst: &DecodedInstruction) -> bool;

    /// `Some(offset)` (a `.text`-relative byte offset) if this is a direct
    /// call instruction with a statically resolvable target. Used by the
    /// `GoWrapperResolver` to find calls into known wrapper functions.
    fn call_target(&self, inst: &DecodedInstruction) -> Option<usize>;

    /// 1 on x86_64 (variable length; byte-at-a-time resync on decode
    /// failure); 4 on aarch64 (fixed-width, so failure always re-aligns).
    fn instruction_alignment(&self) -> usize;
}
