//! x86_64 instruction classifier — §4.8.
//!
//! Recognizes exactly the opcodes the two-pass scan needs: `SYSCALL`,
//! immediate moves into `eax`/`rax`, direct/indirect calls, and the
//! control-flow family (`jmp`/`jcc`/`ret`). Everything else is an
//! intentional decode failure so the scan resyncs one byte at a time —
//! the correct recovery for a variable-length instruction set.

use super::decoder::{DecodedInstruction, InstructionPayload, MachineCodeDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X86Kind {
    Syscall,
    /// Sets `eax`/`rax` to a constant.
    MovImmAx(i64),
    /// Writes `eax`/`rax` by some other means (register/memory source).
    MovOtherAx,
    /// Direct call; `target` is the absolute byte offset if resolvable.
    Call { target: Option<usize> },
    ControlFlow,
}

impl From<X86Kind> for InstructionPayload {
    fn from(kind: X86Kind) -> Self {
        InstructionPayload::X86_64(kind)
    }
}

fn as_x86(inst: &DecodedInstruction) -> Option<X86Kind> {
    match inst.payload {
        InstructionPayload::X86_64(k) => Some(k),
        InstructionPayload::Aarch64(_) => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct X86_64Decoder;

impl MachineCodeDecoder for X86_64Decoder {
    fn decode(&self, bytes: &[u8], offset: usize) -> Option<DecodedInstruction> {
        let rex = bytes
            .get(offset)
            .copied()
            .filter(|&b| (0x40..=0x4F).contains(&b));
        let op_offset = if rex.is_some() { offset + 1 } else { offset };
        let rex_w = rex.map(|r| r & 0x08 != 0).unwrap_or(false);
        let rex_b = rex.map(|r| r & 0x01 != 0).unwrap_or(false);
        let opcode = *bytes.get(op_offset)?;

        let (len, kind) = match opcode {
            0x0F => {
                let op2 = *bytes.get(op_offset + 1)?;
                if op2 == 0x05 {
                    (op_offset + 2 - offset, X86Kind::Syscall)
                } else if (0x80..=0x8F).contains(&op2) {
                    (op_offset + 2 + 4 - offset, X86Kind::ControlFlow)
                } else {
                    return None;
                }
            }
            0xB8..=0xBF => {
                let reg = (opcode - 0xB8) & 0x7;
                let is_ax = reg == 0 && !rex_b;
                let imm_len = if rex_w { 8 } else { 4 };
                let imm_start = op_offset + 1;
                let imm_bytes = bytes.get(imm_start..imm_start + imm_len)?;
                let value = if rex_w {
                    i64::from_le_bytes(imm_bytes.try_into().ok()?)
                } else {
                    u32::from_le_bytes(imm_bytes.try_into().ok()?) as i64
                };
                let kind = if is_ax {
                    X86Kind::MovImmAx(value)
                } else {
                    X86Kind::MovOtherAx
                };
                (imm_start + imm_len - offset, kind)
            }
            0xC7 => {
                let modrm = *bytes.get(op_offset + 1)?;
                if (modrm >> 3) & 0x7 != 0 {
                    return None;
                }
                if modrm >> 6 != 0b11 {
                    return None;
                }
                let rm = modrm & 0x7;
                let is_ax = rm == 0 && !rex_b;
                let imm_start = op_offset + 2;
                let imm_bytes = bytes.get(imm_start..imm_start + 4)?;
                let v32 = u32::from_le_bytes(imm_bytes.try_into().ok()?);
                let value = if rex_w { (v32 as i32) as i64 } else { v32 as i64 };
                let kind = if is_ax {
                    X86Kind::MovImmAx(value)
                } else {
                    X86Kind::MovOtherAx
                };
                (imm_start + 4 - offset, kind)
            }
            0xE8 => {
                let imm_start = op_offset + 1;
                let imm_bytes = bytes.get(imm_start..imm_start + 4)?;
                let rel = i32::from_le_bytes(imm_bytes.try_into().ok()?);
                let len = imm_start + 4 - offset;
                let target = (offset as i64 + len as i64 + rel as i64).try_into().ok();
                (len, X86Kind::Call { target })
            }
            0xFF => {
                let modrm = *bytes.get(op_offset + 1)?;
                let reg = (modrm >> 3) & 0x7;
                if (reg != 2 && reg != 3) || modrm >> 6 != 0b11 {
                    return None;
                }
                (op_offset + 2 - offset, X86Kind::ControlFlow)
            }
            0xC3 => (op_offset + 1 - offset, X86Kind::ControlFlow),
            0xC2 => (op_offset + 3 - offset, X86Kind::ControlFlow),
            0xE9 => (op_offset + 5 - offset, X86Kind::ControlFlow),
            0xEB => (op_offset + 2 - offset, X86Kind::ControlFlow),
            0x70..=0x7F => (op_offset + 2 - offset, X86Kind::ControlFlow),
            _ => return None,
        };

        Some(DecodedInstruction {
            offset,
            len,
            payload: kind.into(),
        })
    }

    fn is_syscall_instruction(&self, inst: &DecodedInstruction) -> bool {
        matches!(as_x86(inst), Some(X86Kind::Syscall))
    }

    fn modifies_syscall_number_register(&self, inst: &DecodedInstruction) -> bool {
        matches!(
            as_x86(inst),
            Some(X86Kind::MovImmAx(_)) | Some(X86Kind::MovOtherAx)
        )
    }

    fn is_immediate_to_syscall_number_register(&self, inst: &DecodedInstruction) -> Option<i64> {
        match as_x86(inst) {
            Some(X86Kind::MovImmAx(v)) => Some(v),
            _ => None,
        }
    }

    fn is_immediate_to_first_arg_register(&self, inst: &DecodedInstruction) -> Option<i64> {
        // Go's syscall wrapper convention also places the trap number in
        // AX, so this coincides with the syscall-number register on x86_64.
        self.is_immediate_to_syscall_number_register(inst)
    }

    fn is_control_flow(&self, inst: &DecodedInstruction) -> bool {
        matches!(
            as_x86(inst),
            Some(X86Kind::ControlFlow) | Some(X86Kind::Call { .. })
        )
    }

    fn call_target(&self, inst: &DecodedInstruction) -> Option<usize> {
        match as_x86(inst) {
            Some(X86Kind::Call { target }) => target,
            _ => None,
        }
    }

    fn instruction_alignment(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_syscall() {
        let bytes = [0x0F, 0x05];
        let decoder = X86_64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert_eq!(inst.len, 2);
        assert!(decoder.is_syscall_instruction(&inst));
    }

    #[test]
    fn decodes_mov_eax_imm32() {
        // mov eax, 0x27 (59 = execve on x86_64, arbitrary for the test)
        let bytes = [0xB8, 0x3B, 0x00, 0x00, 0x00];
        let decoder = X86_64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert_eq!(inst.len, 5);
        assert_eq!(decoder.is_immediate_to_syscall_number_register(&inst), Some(59));
    }

    #[test]
    fn decodes_mov_rax_imm64_with_rex_w() {
        let mut bytes = vec![0x48, 0xB8];
        bytes.extend_from_slice(&41i64.to_le_bytes());
        let decoder = X86_64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert_eq!(inst.len, 10);
        assert_eq!(decoder.is_immediate_to_syscall_number_register(&inst), Some(41));
    }

    #[test]
    fn decodes_ret_as_control_flow() {
        let bytes = [0xC3];
        let decoder = X86_64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert!(decoder.is_control_flow(&inst));
    }

    #[test]
    fn decodes_direct_call_with_resolved_target() {
        // call +0 (rel32 = 0, target = next instruction's offset)
        let bytes = [0xE8, 0x00, 0x00, 0x00, 0x00];
        let decoder = X86_64Decoder;
        let inst = decoder.decode(&bytes, 10).unwrap();
        assert_eq!(inst.len, 5);
        match as_x86(&inst) {
            Some(X86Kind::Call { target }) => assert_eq!(target, Some(15)),
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_opcode_is_a_decode_failure() {
        let bytes = [0x90]; // NOP, intentionally unclassified
        let decoder = X86_64Decoder;
        assert!(decoder.decode(&bytes, 0).is_none());
    }
}
