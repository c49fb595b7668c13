//! Import-table reader for shared-library images.
//!
//! Lists the libraries an image declares as load-time dependencies: the DLL
//! names of a PE import directory, or the `DT_NEEDED` entries of an ELF
//! dynamic section. Only headers and tables are read, nothing is mapped or
//! executed.

use std::path::Path;

use crate::error::ImportError;

type Result<T> = std::result::Result<T, ImportError>;

const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const IMPORT_DIRECTORY_INDEX: usize = 1;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;

/// Names of the libraries `path` imports, in table order.
pub fn read_imports(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_imports(&data)
}

/// Same as [`read_imports`], over an in-memory image.
pub fn parse_imports(data: &[u8]) -> Result<Vec<String>> {
    if data.starts_with(b"MZ") {
        pe_imports(data)
    } else if data.starts_with(ELF_MAGIC) {
        elf_imports(data)
    } else {
        Err(ImportError::UnknownFormat)
    }
}

/// Bounds-checked integer reads over an image.
struct Image<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Image<'a> {
    fn little(data: &'a [u8]) -> Self {
        Self {
            data,
            big_endian: false,
        }
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| ImportError::Malformed(format!("read of {} bytes at {:#x}", N, offset)))
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.bytes::<2>(offset)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.bytes::<4>(offset)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn u64(&self, offset: usize) -> Result<u64> {
        let b = self.bytes::<8>(offset)?;
        Ok(if self.big_endian {
            u64::from_be_bytes(b)
        } else {
            u64::from_le_bytes(b)
        })
    }

    /// Word sized by ELF class: 4 bytes for ELF32, 8 for ELF64.
    fn word(&self, offset: usize, wide: bool) -> Result<u64> {
        if wide {
            self.u64(offset)
        } else {
            self.u32(offset).map(u64::from)
        }
    }

    fn c_str(&self, offset: usize) -> Result<String> {
        let tail = self
            .data
            .get(offset..)
            .ok_or_else(|| ImportError::Malformed(format!("string at {:#x}", offset)))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ImportError::Malformed(format!("unterminated string at {:#x}", offset)))?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

fn to_offset(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| ImportError::Malformed(format!("offset {:#x}", value)))
}

/// `base + delta`, rejecting offsets that do not fit the address space.
fn at(base: usize, delta: usize) -> Result<usize> {
    base.checked_add(delta)
        .ok_or_else(|| ImportError::Malformed(format!("offset {:#x} + {:#x} overflows", base, delta)))
}

/// Byte offset of entry `index` in a table of `size`-byte entries at `base`.
fn entry_at(base: usize, index: usize, size: usize) -> Result<usize> {
    let delta = index
        .checked_mul(size)
        .ok_or_else(|| ImportError::Malformed(format!("table entry {} of size {}", index, size)))?;
    at(base, delta)
}

struct PeSection {
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

fn pe_imports(data: &[u8]) -> Result<Vec<String>> {
    let image = Image::little(data);

    let pe_offset = image.u32(0x3c)? as usize;
    if image.bytes::<4>(pe_offset)? != *PE_SIGNATURE {
        return Err(ImportError::Malformed("missing PE signature".into()));
    }

    let coff = at(pe_offset, 4)?;
    let section_count = image.u16(at(coff, 2)?)? as usize;
    let optional_size = image.u16(at(coff, 16)?)? as usize;
    let optional = at(coff, 20)?;

    let (rva_count_offset, directories) = match image.u16(optional)? {
        PE32_MAGIC => (at(optional, 92)?, at(optional, 96)?),
        PE32_PLUS_MAGIC => (at(optional, 108)?, at(optional, 112)?),
        magic => {
            return Err(ImportError::Malformed(format!(
                "unknown optional header magic {:#x}",
                magic
            )))
        }
    };

    if (image.u32(rva_count_offset)? as usize) <= IMPORT_DIRECTORY_INDEX {
        return Ok(Vec::new());
    }
    let import_rva = image.u32(entry_at(directories, IMPORT_DIRECTORY_INDEX, 8)?)?;
    if import_rva == 0 {
        return Ok(Vec::new());
    }

    let section_table = at(optional, optional_size)?;
    let sections = (0..section_count)
        .map(|i| {
            let header = entry_at(section_table, i, SECTION_HEADER_SIZE)?;
            Ok(PeSection {
                virtual_size: image.u32(at(header, 8)?)?,
                virtual_address: image.u32(at(header, 12)?)?,
                raw_size: image.u32(at(header, 16)?)?,
                raw_offset: image.u32(at(header, 20)?)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let rva_to_offset = |rva: u32| -> Result<usize> {
        let section = sections
            .iter()
            .find(|s| {
                let span = s.virtual_size.max(s.raw_size);
                rva >= s.virtual_address && rva - s.virtual_address < span
            })
            .ok_or_else(|| ImportError::Malformed(format!("rva {:#x} outside sections", rva)))?;
        at(section.raw_offset as usize, (rva - section.virtual_address) as usize)
    };

    let mut names = Vec::new();
    let mut descriptor = rva_to_offset(import_rva)?;
    loop {
        let name_rva = image.u32(at(descriptor, 12)?)?;
        let first_thunk = image.u32(at(descriptor, 16)?)?;
        if name_rva == 0 && first_thunk == 0 {
            break;
        }
        if name_rva != 0 {
            names.push(image.c_str(rva_to_offset(name_rva)?)?);
        }
        descriptor = at(descriptor, IMPORT_DESCRIPTOR_SIZE)?;
    }

    Ok(names)
}

struct ElfSegment {
    kind: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
}

fn elf_imports(data: &[u8]) -> Result<Vec<String>> {
    let wide = match data.get(4) {
        Some(1) => false,
        Some(2) => true,
        _ => return Err(ImportError::Malformed("unknown ELF class".into())),
    };
    let big_endian = match data.get(5) {
        Some(1) => false,
        Some(2) => true,
        _ => return Err(ImportError::Malformed("unknown ELF data encoding".into())),
    };
    let image = Image { data, big_endian };

    let (phoff, phentsize, phnum) = if wide {
        (image.u64(0x20)?, image.u16(0x36)?, image.u16(0x38)?)
    } else {
        (u64::from(image.u32(0x1c)?), image.u16(0x2a)?, image.u16(0x2c)?)
    };
    let phoff = to_offset(phoff)?;

    let segments = (0..phnum as usize)
        .map(|i| {
            let header = entry_at(phoff, i, phentsize as usize)?;
            let kind = image.u32(header)?;
            Ok(if wide {
                ElfSegment {
                    kind,
                    offset: image.u64(at(header, 8)?)?,
                    vaddr: image.u64(at(header, 16)?)?,
                    filesz: image.u64(at(header, 32)?)?,
                }
            } else {
                ElfSegment {
                    kind,
                    offset: u64::from(image.u32(at(header, 4)?)?),
                    vaddr: u64::from(image.u32(at(header, 8)?)?),
                    filesz: u64::from(image.u32(at(header, 16)?)?),
                }
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(dynamic) = segments.iter().find(|s| s.kind == PT_DYNAMIC) else {
        return Ok(Vec::new());
    };

    let entry_size = if wide { 16 } else { 8 };
    let half = entry_size / 2;
    let start = to_offset(dynamic.offset)?;
    let count = to_offset(dynamic.filesz)? / entry_size;

    let mut needed = Vec::new();
    let mut strtab = None;
    for i in 0..count {
        let entry = entry_at(start, i, entry_size)?;
        let tag = image.word(entry, wide)?;
        let value = image.word(at(entry, half)?, wide)?;
        match tag {
            DT_NULL => break,
            DT_NEEDED => needed.push(value),
            DT_STRTAB => strtab = Some(value),
            _ => {}
        }
    }

    if needed.is_empty() {
        return Ok(Vec::new());
    }
    let strtab = strtab.ok_or_else(|| ImportError::Malformed("DT_NEEDED without DT_STRTAB".into()))?;
    let segment = segments
        .iter()
        .filter(|s| s.kind == PT_LOAD)
        .find(|s| strtab >= s.vaddr && strtab - s.vaddr < s.filesz)
        .ok_or_else(|| ImportError::Malformed(format!("string table {:#x} not loaded", strtab)))?;
    let strtab = (strtab - segment.vaddr)
        .checked_add(segment.offset)
        .ok_or_else(|| ImportError::Malformed(format!("string table {:#x} overflows", strtab)))?;

    needed
        .into_iter()
        .map(|name| {
            let offset = strtab
                .checked_add(name)
                .ok_or_else(|| ImportError::Malformed(format!("name {:#x} overflows", name)))?;
            image.c_str(to_offset(offset)?)
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_pe_imports() {
        let image = pe_with_imports(&["KERNEL32.dll", "helper.dll"]);
        assert_eq!(
            parse_imports(&image).unwrap(),
            vec!["KERNEL32.dll", "helper.dll"]
        );
    }

    #[test]
    fn test_pe_without_imports() {
        let image = pe_with_imports(&[]);
        assert!(parse_imports(&image).unwrap().is_empty());
    }

    #[test]
    fn test_elf_needed() {
        let image = elf64_with_needed(&["libc.so.6", "libhelper.so"]);
        assert_eq!(
            parse_imports(&image).unwrap(),
            vec!["libc.so.6", "libhelper.so"]
        );
    }

    #[test]
    fn test_elf_load_offset_overflow_is_malformed() {
        let mut image = elf64_with_needed(&["libc.so.6"]);
        // p_offset of the PT_LOAD header.
        image[0x48..0x50].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            parse_imports(&image),
            Err(ImportError::Malformed(_))
        ));
    }

    #[test]
    fn test_elf_name_offset_overflow_is_malformed() {
        let mut image = elf64_with_needed(&["libc.so.6"]);
        // d_val of the DT_NEEDED entry, right after DT_STRTAB.
        image[0x118..0x120].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            parse_imports(&image),
            Err(ImportError::Malformed(_))
        ));
    }

    #[test]
    fn test_elf_program_headers_past_end_are_malformed() {
        let mut image = elf64_with_needed(&["libc.so.6"]);
        image[0x20..0x28].copy_from_slice(&(u64::MAX - 8).to_le_bytes());
        assert!(matches!(
            parse_imports(&image),
            Err(ImportError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            parse_imports(b"not a library"),
            Err(ImportError::UnknownFormat)
        ));
    }

    #[test]
    fn test_truncated_pe() {
        let image = pe_with_imports(&["a.dll"]);
        assert!(matches!(
            parse_imports(&image[..0x90]),
            Err(ImportError::Malformed(_))
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_imports(Path::new("/nonexistent/lib.dll")).unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }
}
