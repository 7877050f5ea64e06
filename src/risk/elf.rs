//! Hand-rolled ELF64 reader for the Risk Analyzer — §4.8.
//!
//! Parses just enough of the ELF header, section header table, and
//! section-string-table to locate `.text`, an optional `.gopclntab`, and
//! the symbol table. Operates directly on bytes the File Validator has
//! already hashed and returned — this module never re-opens the file.

use std::collections::HashMap;

use crate::core::error::RiskPolicyError;

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

const EM_X86_64: u16 = 0x3E;
const EM_AARCH64: u16 = 0xB7;

const SHT_SYMTAB: u32 = 2;
const SHT_DYNSYM: u32 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

pub struct LoadedElf {
    pub architecture: Architecture,
    pub text: Vec<u8>,
    pub text_vaddr: u64,
    pub gopclntab: Option<Vec<u8>>,
    /// Symbol name -> (start address, size), used to find Go syscall
    /// wrapper function ranges (`syscall.Syscall`, `syscall.RawSyscall`, …).
    pub symbols: HashMap<String, (u64, u64)>,
}

impl LoadedElf {
    /// Translate a `.text`-relative byte offset back to its runtime vaddr.
    #[must_use]
    pub fn offset_to_vaddr(&self, offset: usize) -> u64 {
        self.text_vaddr + offset as u64
    }

    /// Translate a runtime vaddr into a `.text`-relative byte offset, if it
    /// falls within `.text`.
    #[must_use]
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<usize> {
        let end = self.text_vaddr + self.text.len() as u64;
        if vaddr >= self.text_vaddr && vaddr < end {
            Some((vaddr - self.text_vaddr) as usize)
        } else {
            None
        }
    }
}

struct SectionHeader {
    name_off: u32,
    sh_type: u32,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

fn u16_at(bytes: &[u8], off: usize) -> Option<u16> {
    bytes.get(off..off + 2).map(|s| u16::from_le_bytes(s.try_into().unwrap()))
}

fn u32_at(bytes: &[u8], off: usize) -> Option<u32> {
    bytes.get(off..off + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn u64_at(bytes: &[u8], off: usize) -> Option<u64> {
    bytes.get(off..off + 8).map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

/// Read a NUL-terminated string out of a string-table section at `off`.
fn str_at(strtab: &[u8], off: u32) -> String {
    let start = off as usize;
    let Some(slice) = strtab.get(start..) else {
        return String::new();
    };
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

fn read_section_headers(bytes: &[u8]) -> Option<Vec<SectionHeader>> {
    let e_shoff = u64_at(bytes, 40)? as usize;
    let e_shentsize = u16_at(bytes, 58)? as usize;
    let e_shnum = u16_at(bytes, 60)? as usize;

    let mut headers = Vec::with_capacity(e_shnum);
    for i in 0..e_shnum {
        let base = e_shoff + i * e_shentsize;
        headers.push(SectionHeader {
            name_off: u32_at(bytes, base)?,
            sh_type: u32_at(bytes, base + 4)?,
            addr: u64_at(bytes, base + 16)?,
            offset: u64_at(bytes, base + 24)?,
            size: u64_at(bytes, base + 32)?,
            link: u32_at(bytes, base + 40)?,
            entsize: u64_at(bytes, base + 56)?,
        });
    }
    Some(headers)
}

fn section_bytes<'a>(bytes: &'a [u8], sh: &SectionHeader) -> Option<&'a [u8]> {
    let start = sh.offset as usize;
    let end = start.checked_add(sh.size as usize)?;
    bytes.get(start..end)
}

pub fn parse(bytes: &[u8]) -> Result<LoadedElf, RiskPolicyError> {
    if bytes.len() < 64 || bytes[0..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(RiskPolicyError::UnsupportedArchitecture(0));
    }
    if bytes[EI_CLASS] != ELFCLASS64 || bytes[EI_DATA] != ELFDATA2LSB {
        return Err(RiskPolicyError::UnsupportedArchitecture(0));
    }

    let e_machine = u16_at(bytes, 18).ok_or(RiskPolicyError::UnsupportedArchitecture(0))?;
    let architecture = match e_machine {
        EM_X86_64 => Architecture::X86_64,
        EM_AARCH64 => Architecture::Aarch64,
        other => return Err(RiskPolicyError::UnsupportedArchitecture(other)),
    };

    let e_shstrndx = u16_at(bytes, 62).ok_or(RiskPolicyError::UnsupportedArchitecture(e_machine))? as usize;
    let headers =
        read_section_headers(bytes).ok_or(RiskPolicyError::UnsupportedArchitecture(e_machine))?;
    let shstrtab_hdr = headers
        .get(e_shstrndx)
        .ok_or(RiskPolicyError::UnsupportedArchitecture(e_machine))?;
    let shstrtab = section_bytes(bytes, shstrtab_hdr)
        .ok_or(RiskPolicyError::UnsupportedArchitecture(e_machine))?;

    let mut text: Option<Vec<u8>> = None;
    let mut text_vaddr = 0u64;
    let mut gopclntab = None;
    let mut symtab_idx = None;

    for sh in &headers {
        let name = str_at(shstrtab, sh.name_off);
        match name.as_str() {
            ".text" => {
                text = section_bytes(bytes, sh).map(<[u8]>::to_vec);
                text_vaddr = sh.addr;
            }
            ".gopclntab" => {
                gopclntab = section_bytes(bytes, sh).map(<[u8]>::to_vec);
            }
            _ => {}
        }
        if sh.sh_type == SHT_SYMTAB {
            symtab_idx = Some(sh);
        }
    }
    // Fall back to .dynsym when there's no full .symtab (stripped binaries).
    let symtab_hdr = symtab_idx.or_else(|| headers.iter().find(|sh| sh.sh_type == SHT_DYNSYM));

    let mut symbols = HashMap::new();
    if let Some(symtab) = symtab_hdr {
        if let Some(strtab_hdr) = headers.get(symtab.link as usize) {
            if let (Some(symtab_bytes), Some(strtab_bytes)) =
                (section_bytes(bytes, symtab), section_bytes(bytes, strtab_hdr))
            {
                let entsize = if symtab.entsize == 0 { 24 } else { symtab.entsize as usize };
                let count = symtab_bytes.len() / entsize;
                for i in 0..count {
                    let base = i * entsize;
                    let Some(st_name) = u32_at(symtab_bytes, base) else { continue };
                    let Some(st_value) = u64_at(symtab_bytes, base + 8) else { continue };
                    let Some(st_size) = u64_at(symtab_bytes, base + 16) else { continue };
                    let name = str_at(strtab_bytes, st_name);
                    if !name.is_empty() {
                        symbols.insert(name, (st_value, st_size));
                    }
                }
            }
        }
    }

    let text = text.ok_or(RiskPolicyError::UnsupportedArchitecture(e_machine))?;

    Ok(LoadedElf {
        architecture,
        text,
        text_vaddr,
        gopclntab,
        symbols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Builds a minimal but structurally valid ELF64 LE x86_64 file with a
    /// null section, a `.text` section, and a `.shstrtab` section.
    fn synthetic_elf(machine: u16, text_contents: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        // e_ident
        buf.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf.push(2); // ELFCLASS64
        buf.push(1); // ELFDATA2LSB
        buf.push(1); // EI_VERSION
        buf.extend_from_slice(&[0u8; 9]); // EI_OSABI.. padding to 16 bytes
        push_u16(&mut buf, 2); // e_type (ET_EXEC)
        push_u16(&mut buf, machine); // e_machine
        push_u32(&mut buf, 1); // e_version
        push_u64(&mut buf, 0); // e_entry
        push_u64(&mut buf, 0); // e_phoff
        push_u64(&mut buf, 64); // e_shoff (right after the 64-byte header)
        push_u32(&mut buf, 0); // e_flags
        push_u16(&mut buf, 64); // e_ehsize
        push_u16(&mut buf, 0); // e_phentsize
        push_u16(&mut buf, 0); // e_phnum
        push_u16(&mut buf, 64); // e_shentsize
        push_u16(&mut buf, 3); // e_shnum
        push_u16(&mut buf, 2); // e_shstrndx
        assert_eq!(buf.len(), 64);

        let shstrtab = b"\0.text\0.shstrtab\0";
        let text_offset = 64 + 3 * 64;
        let shstrtab_offset = text_offset + text_contents.len();

        // [0] null section header
        buf.extend_from_slice(&[0u8; 64]);

        // [1] .text
        push_u32(&mut buf, 1); // name_off -> ".text"
        push_u32(&mut buf, 1); // sh_type PROGBITS
        push_u64(&mut buf, 6); // sh_flags
        push_u64(&mut buf, 0x1000); // sh_addr
        push_u64(&mut buf, text_offset as u64); // sh_offset
        push_u64(&mut buf, text_contents.len() as u64); // sh_size
        push_u32(&mut buf, 0); // sh_link
        push_u32(&mut buf, 0); // sh_info
        push_u64(&mut buf, 1); // sh_addralign
        push_u64(&mut buf, 0); // sh_entsize

        // [2] .shstrtab
        push_u32(&mut buf, 7); // name_off -> ".shstrtab"
        push_u32(&mut buf, 3); // sh_type STRTAB
        push_u64(&mut buf, 0); // sh_flags
        push_u64(&mut buf, 0); // sh_addr
        push_u64(&mut buf, shstrtab_offset as u64); // sh_offset
        push_u64(&mut buf, shstrtab.len() as u64); // sh_size
        push_u32(&mut buf, 0); // sh_link
        push_u32(&mut buf, 0); // sh_info
        push_u64(&mut buf, 1); // sh_addralign
        push_u64(&mut buf, 0); // sh_entsize

        assert_eq!(buf.len(), text_offset);
        buf.extend_from_slice(text_contents);
        assert_eq!(buf.len(), shstrtab_offset);
        buf.extend_from_slice(shstrtab);

        buf
    }

    #[test]
    fn parses_text_section_and_architecture() {
        let text = vec![0x0F, 0x05, 0xC3, 0x90];
        let bytes = synthetic_elf(0x3E, &text);
        let elf = parse(&bytes).unwrap();
        assert_eq!(elf.architecture, Architecture::X86_64);
        assert_eq!(elf.text, text);
        assert_eq!(elf.text_vaddr, 0x1000);
        assert_eq!(elf.offset_to_vaddr(2), 0x1002);
        assert_eq!(elf.vaddr_to_offset(0x1002), Some(2));
        assert!(elf.gopclntab.is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 128];
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn rejects_unsupported_machine_type() {
        let bytes = synthetic_elf(0x28, &[0x00]); // EM_ARM
        match parse(&bytes) {
            Err(RiskPolicyError::UnsupportedArchitecture(m)) => assert_eq!(m, 0x28),
            other => panic!("expected UnsupportedArchitecture, got {other:?}"),
        }
    }
}
