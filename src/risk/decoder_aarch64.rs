//! aarch64 instruction classifier — §4.8.
//!
//! Fixed 4-byte instructions, so a decode failure always re-aligns cleanly
//! (`instruction_alignment() == 4`). Recognizes `SVC #0`, `MOVZ` into the
//! syscall-number (`x8`/`w8`) and first-argument (`x0`/`w0`) registers, the
//! register-copy `MOV` alias (an indirect, non-immediate write), `BL`/`BR`/
//! `BLR`/`RET`, and unconditional/conditional branches.

use super::decoder::{DecodedInstruction, InstructionPayload, MachineCodeDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm64Kind {
    Svc,
    /// `MOVZ` setting `x8`/`w8` (the syscall-number register) to a constant.
    MovzSyscallReg(i64),
    /// `MOVZ` setting `x0`/`w0` (the first-argument register) to a constant.
    MovzFirstArgReg(i64),
    /// Register-copy `MOV` writing `x8`/`w8` from another register.
    MovRegSyscallReg,
    /// Register-copy `MOV` writing `x0`/`w0` from another register.
    MovRegFirstArgReg,
    /// `BL`; `target` is the absolute byte offset.
    Call { target: usize },
    /// `BR`/`BLR` (indirect call).
    IndirectCall,
    ControlFlow,
}

impl From<Arm64Kind> for InstructionPayload {
    fn from(kind: Arm64Kind) -> Self {
        InstructionPayload::Aarch64(kind)
    }
}

fn as_arm(inst: &DecodedInstruction) -> Option<Arm64Kind> {
    match inst.payload {
        InstructionPayload::Aarch64(k) => Some(k),
        InstructionPayload::X86_64(_) => None,
    }
}

const SVC0: u32 = 0xD401_0001;
const RET_BASE: u32 = 0xD65F_0000;
const RET_MASK: u32 = 0xFFFF_FC1F;
const BR_BASE: u32 = 0xD61F_0000;
const BLR_BASE: u32 = 0xD63F_0000;
const BR_MASK: u32 = 0xFFFF_FC1F;
const BCOND_MASK: u32 = 0xFF00_0000;
const BCOND_BASE: u32 = 0x5400_0000;
const MOV_REG64_BASE: u32 = 0xAA00_03E0;
const MOV_REG32_BASE: u32 = 0x2A00_03E0;
const MOV_REG_MASK: u32 = 0xFFE0_FFE0;

#[derive(Debug, Default, Clone, Copy)]
pub struct Aarch64Decoder;

impl MachineCodeDecoder for Aarch64Decoder {
    fn decode(&self, bytes: &[u8], offset: usize) -> Option<DecodedInstruction> {
        let raw = bytes.get(offset..offset + 4)?;
        let word = u32::from_le_bytes(raw.try_into().ok()?);

        let kind = if word == SVC0 {
            Arm64Kind::Svc
        } else if word & 0x7FE0_0000 == 0x5280_0000 {
            // MOVZ Wd/Xd, #imm16 (hw == 0 only)
            let sf_64 = word & 0x8000_0000 != 0;
            let _ = sf_64; // sf doesn't change our classification, only width.
            let imm16 = (word >> 5) & 0xFFFF;
            let rd = word & 0x1F;
            match rd {
                8 => Arm64Kind::MovzSyscallReg(imm16 as i64),
                0 => Arm64Kind::MovzFirstArgReg(imm16 as i64),
                _ => return None,
            }
        } else if word & MOV_REG_MASK == MOV_REG64_BASE || word & MOV_REG_MASK == MOV_REG32_BASE {
            let rd = word & 0x1F;
            match rd {
                8 => Arm64Kind::MovRegSyscallReg,
                0 => Arm64Kind::MovRegFirstArgReg,
                _ => return None,
            }
        } else if word & 0xFC00_0000 == 0x9400_0000 {
            let imm26 = word & 0x03FF_FFFF;
            let signed = sign_extend(imm26, 26);
            let target = (offset as i64 + signed * 4) as usize;
            Arm64Kind::Call { target }
        } else if word & BR_MASK == BR_BASE || word & BR_MASK == BLR_BASE {
            Arm64Kind::IndirectCall
        } else if word & RET_MASK == RET_BASE {
            Arm64Kind::ControlFlow
        } else if word & 0xFC00_0000 == 0x1400_0000 {
            Arm64Kind::ControlFlow
        } else if word & BCOND_MASK == BCOND_BASE {
            Arm64Kind::ControlFlow
        } else {
            return None;
        };

        Some(DecodedInstruction {
            offset,
            len: 4,
            payload: kind.into(),
        })
    }

    fn is_syscall_instruction(&self, inst: &DecodedInstruction) -> bool {
        matches!(as_arm(inst), Some(Arm64Kind::Svc))
    }

    fn modifies_syscall_number_register(&self, inst: &DecodedInstruction) -> bool {
        matches!(
            as_arm(inst),
            Some(Arm64Kind::MovzSyscallReg(_)) | Some(Arm64Kind::MovRegSyscallReg)
        )
    }

    fn is_immediate_to_syscall_number_register(&self, inst: &DecodedInstruction) -> Option<i64> {
        match as_arm(inst) {
            Some(Arm64Kind::MovzSyscallReg(v)) => Some(v),
            _ => None,
        }
    }

    fn is_immediate_to_first_arg_register(&self, inst: &DecodedInstruction) -> Option<i64> {
        match as_arm(inst) {
            Some(Arm64Kind::MovzFirstArgReg(v)) => Some(v),
            _ => None,
        }
    }

    fn is_control_flow(&self, inst: &DecodedInstruction) -> bool {
        matches!(
            as_arm(inst),
            Some(Arm64Kind::ControlFlow)
                | Some(Arm64Kind::Call { .. })
                | Some(Arm64Kind::IndirectCall)
        )
    }

    fn call_target(&self, inst: &DecodedInstruction) -> Option<usize> {
        match as_arm(inst) {
            Some(Arm64Kind::Call { target }) => Some(target),
            _ => None,
        }
    }

    fn instruction_alignment(&self) -> usize {
        4
    }
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    ((value << shift) as i32 >> shift) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_svc_zero() {
        let bytes = SVC0.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert!(decoder.is_syscall_instruction(&inst));
    }

    #[test]
    fn decodes_movz_x8_immediate() {
        // movz x8, #0xdd (221 = write on arm64)
        let word = 0xD280_0000u32 | (221 << 5) | 8;
        let bytes = word.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert_eq!(decoder.is_immediate_to_syscall_number_register(&inst), Some(221));
    }

    #[test]
    fn decodes_movz_w0_immediate_as_first_arg() {
        let word = 0x5280_0000u32 | (4 << 5) | 0;
        let bytes = word.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert_eq!(decoder.is_immediate_to_first_arg_register(&inst), Some(4));
    }

    #[test]
    fn decodes_ret_as_control_flow() {
        let word = RET_BASE | (30 << 5);
        let bytes = word.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert!(decoder.is_control_flow(&inst));
    }

    #[test]
    fn decodes_bl_with_resolved_target() {
        let word = 0x9400_0002u32; // bl #8 (imm26=2 words = 8 bytes)
        let bytes = word.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 100).unwrap();
        match as_arm(&inst) {
            Some(Arm64Kind::Call { target }) => assert_eq!(target, 108),
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn decodes_register_mov_into_x8_as_indirect() {
        let word = MOV_REG64_BASE | (1 << 16) | 8; // mov x8, x1
        let bytes = word.to_le_bytes();
        let decoder = Aarch64Decoder;
        let inst = decoder.decode(&bytes, 0).unwrap();
        assert!(decoder.modifies_syscall_number_register(&inst));
        assert_eq!(decoder.is_immediate_to_syscall_number_register(&inst), None);
    }

    #[test]
    fn decode_failure_recovers_on_word_boundary() {
        let bytes = [0xFF, 0xFF, 0xFF, 0x00]; // unrecognized
        let decoder = Aarch64Decoder;
        assert!(decoder.decode(&bytes, 0).is_none());
        assert_eq!(decoder.instruction_alignment(), 4);
    }
}
