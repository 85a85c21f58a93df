use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::memory::Memory;

const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF32 header field offsets (little-endian on this target).
const ENTRY_POINT: u32 = 0x18;
const PH_OFFSET: u32 = 0x1C;
const PH_ENTRY_SIZE: u32 = 0x2A;
const PH_COUNT: u32 = 0x2C;

/// Program header field offsets, relative to the entry.
const P_OFFSET: u32 = 0x04;
const P_VADDR: u32 = 0x08;
const P_FILESZ: u32 = 0x10;

/// Why a program could not be loaded. The machine is left in whatever
/// state reset put it in; nothing is partially visible to the caller.
#[derive(Debug)]
pub enum LoaderError {
    Io(io::Error),
    /// The first four bytes are not `0x7F 'E' 'L' 'F'`.
    BadMagic,
    /// The file ends before a header or segment it promises.
    Truncated,
    /// A segment byte lands outside the simulated memory.
    InsufficientMemory { address: u32 },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "cannot read the executable: {error}"),
            Self::BadMagic => write!(f, "the ELF magic bytes are incorrect"),
            Self::Truncated => write!(f, "the ELF file is truncated"),
            Self::InsufficientMemory { address } => {
                write!(
                    f,
                    "insufficient memory: segment byte at {address:#010X} is outside RAM"
                )
            }
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for LoaderError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

/// Loads a 32-bit ELF executable into memory and returns its entry point.
/// The caller is expected to seed PC with the returned address.
pub fn load_elf(path: impl AsRef<Path>, memory: &mut Memory) -> Result<u32, LoaderError> {
    let data = fs::read(path)?;
    load_elf_bytes(&data, memory)
}

/// Parses an in-memory ELF image and streams its segments into memory.
pub fn load_elf_bytes(data: &[u8], memory: &mut Memory) -> Result<u32, LoaderError> {
    if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
        return Err(LoaderError::BadMagic);
    }

    let entry = read_word(data, ENTRY_POINT)?;
    let ph_offset = read_word(data, PH_OFFSET)?;
    let ph_entry_size = u32::from(read_halfword(data, PH_ENTRY_SIZE)?);
    let ph_count = u32::from(read_halfword(data, PH_COUNT)?);
    info!(ph_count, "loading ELF, entry point {entry:#010X}");

    for index in 0..ph_count {
        let header = ph_offset + index * ph_entry_size;
        let offset = read_word(data, header + P_OFFSET)?;
        let vaddr = read_word(data, header + P_VADDR)?;
        let file_size = read_word(data, header + P_FILESZ)?;
        debug!(
            index,
            offset, file_size, "streaming segment to {vaddr:#010X}"
        );

        for i in 0..file_size {
            let byte = *data
                .get((offset + i) as usize)
                .ok_or(LoaderError::Truncated)?;
            let address = vaddr.wrapping_add(i);
            memory
                .write_byte(address, byte)
                .map_err(|_| LoaderError::InsufficientMemory { address })?;
        }
    }

    Ok(entry)
}

fn read_word(data: &[u8], offset: u32) -> Result<u32, LoaderError> {
    let start = offset as usize;
    let bytes = data
        .get(start..start + 4)
        .ok_or(LoaderError::Truncated)?
        .try_into()
        .map_err(|_| LoaderError::Truncated)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_halfword(data: &[u8], offset: u32) -> Result<u16, LoaderError> {
    let start = offset as usize;
    let bytes = data
        .get(start..start + 2)
        .ok_or(LoaderError::Truncated)?
        .try_into()
        .map_err(|_| LoaderError::Truncated)?;
    Ok(u16::from_le_bytes(bytes))
}

#[cfg(test)]
const HEADER_SIZE: usize = 52;
#[cfg(test)]
const PH_SIZE: usize = 32;

/// Builds a minimal ELF32 image for tests: header, program headers, then
/// the segment bytes packed back to back.
#[cfg(test)]
pub(crate) fn test_image(entry: u32, segments: &[(u32, &[u8])]) -> Vec<u8> {
    let ph_offset = HEADER_SIZE;
    let mut data_offset = ph_offset + segments.len() * PH_SIZE;

    let mut image = vec![0_u8; data_offset];
    image[..4].copy_from_slice(&MAGIC);
    image[ENTRY_POINT as usize..ENTRY_POINT as usize + 4].copy_from_slice(&entry.to_le_bytes());
    image[PH_OFFSET as usize..PH_OFFSET as usize + 4]
        .copy_from_slice(&(ph_offset as u32).to_le_bytes());
    image[PH_ENTRY_SIZE as usize..PH_ENTRY_SIZE as usize + 2]
        .copy_from_slice(&(PH_SIZE as u16).to_le_bytes());
    image[PH_COUNT as usize..PH_COUNT as usize + 2]
        .copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (index, (vaddr, bytes)) in segments.iter().enumerate() {
        let header = ph_offset + index * PH_SIZE;
        image[header + P_OFFSET as usize..header + P_OFFSET as usize + 4]
            .copy_from_slice(&(data_offset as u32).to_le_bytes());
        image[header + P_VADDR as usize..header + P_VADDR as usize + 4]
            .copy_from_slice(&vaddr.to_le_bytes());
        image[header + P_FILESZ as usize..header + P_FILESZ as usize + 4]
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        data_offset += bytes.len();
    }
    for (_, bytes) in segments {
        image.extend_from_slice(bytes);
    }
    image
}
