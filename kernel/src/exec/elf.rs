use crate::*;
use super::*;
use axiom::io::RandomRead;
use bitflags::bitflags;
use core::mem::size_of;

const ELF_SIGNATURE: u32 = 0x464C_457F;
const CLASS_ELF64: u8 = 2;
const ENDIAN_LITTLE: u8 = 1;
const TYPE_EXECUTABLE: u16 = 2;
const PT_LOAD: u32 = 1;

bitflags! {
    pub struct SegmentFlags: u32 {
        const EXECUTABLE = 1;
        const WRITABLE = 2;
        const READABLE = 4;
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
struct ElfHeader {
    signature: u32,
    bitness: u8,
    endianness: u8,
    header_version: u8,
    abi: u8,
    _reserved: u64,
    executable_type: u16,
    instruction_set: u16,
    elf_version: u32,
    entry_point: u64,
    program_header_offset: u64,
    section_header_offset: u64,
    flags: u32,
    header_size: u16,
    program_header_entry_size: u16,
    program_header_entry_count: u16,
    section_header_entry_size: u16,
    section_header_entry_count: u16,
    section_name_table_index: u16,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
struct ProgramHeaderEntry {
    entry_type: u32,
    flags: u32,
    file_offset: u64,
    virt_address: u64,
    _phys_address: u64,
    size_in_file: u64,
    size_in_memory: u64,
    required_alignment: u64,
}

pub struct ELFLoader {}

impl ELFLoader {
    /// Reads the executable header and collapses the PT_LOAD entries into the
    /// two segment classes an image is built from: read-only (code plus
    /// constants) and read-write (data). Anything the loader below cannot
    /// represent is rejected as an invalid executable.
    pub fn parse<F: RandomRead>(file: &mut F) -> Result<ExecutableInfo, Error> {
        let mut buf = [0u8; size_of::<ElfHeader>()];
        file.seek(0).map_err(|_| Error::InvalidExecutable)?;
        read_exact(file, &mut buf)?;
        let header = unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const ElfHeader) };

        let signature = header.signature;
        if signature != ELF_SIGNATURE {
            return Err(Error::InvalidExecutable);
        }
        if header.bitness != CLASS_ELF64 || header.endianness != ENDIAN_LITTLE {
            return Err(Error::InvalidExecutable);
        }
        let executable_type = header.executable_type;
        if executable_type != TYPE_EXECUTABLE {
            // no relocatable or shared objects, so far we have no dynamic linking
            return Err(Error::InvalidExecutable);
        }

        let table_offset = header.program_header_offset;
        let entry_size = header.program_header_entry_size as u64;
        if (entry_size as usize) < size_of::<ProgramHeaderEntry>() {
            return Err(Error::InvalidExecutable);
        }

        let mut ro = None;
        let mut rw = None;
        for i in 0..header.program_header_entry_count as u64 {
            let mut buf = [0u8; size_of::<ProgramHeaderEntry>()];
            file.seek(table_offset + i * entry_size)
                .map_err(|_| Error::InvalidExecutable)?;
            read_exact(file, &mut buf)?;
            let phdr =
                unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const ProgramHeaderEntry) };

            if phdr.entry_type != PT_LOAD {
                continue;
            }
            let vaddr = phdr.virt_address;
            let size_in_file = phdr.size_in_file;
            let size_in_memory = phdr.size_in_memory;
            if size_in_memory == 0 {
                continue;
            }
            // the userland linker script places segments on page boundaries
            if vaddr % PAGE != 0 || size_in_file > size_in_memory {
                return Err(Error::InvalidExecutable);
            }

            let segment = SegmentImage {
                vaddr,
                size: size_in_file,
                file_offset: phdr.file_offset,
                pages: size_in_memory.div_ceil(PAGE),
            };
            let flags = SegmentFlags::from_bits_truncate(phdr.flags);
            let class = if flags.contains(SegmentFlags::WRITABLE) {
                &mut rw
            } else {
                &mut ro
            };
            if class.is_some() {
                return Err(Error::InvalidExecutable);
            }
            *class = Some(segment);
        }

        Ok(ExecutableInfo {
            entry_point: header.entry_point,
            ro: ro.unwrap_or(SegmentImage::empty()),
            rw: rw.unwrap_or(SegmentImage::empty()),
        })
    }
}

fn read_exact<F: RandomRead>(file: &mut F, buf: &mut [u8]) -> Result<(), Error> {
    if file.read(buf)? != buf.len() {
        return Err(Error::InvalidExecutable);
    }
    Ok(())
}
