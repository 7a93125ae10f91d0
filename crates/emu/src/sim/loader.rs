//! Boot-image loading.
//!
//! Two formats: a raw BIOS image copied to the RAM base, or an ELF whose
//! PT_LOAD segments are placed at their physical addresses. The reset ROM
//! always jumps to the RAM base, so an ELF entry point anywhere else is a
//! configuration error rather than something to silently honor.

use crate::common::LoaderError;
use crate::soc::memmap::PhysMemMap;
use object::{Object, ObjectSegment};
use std::path::Path;

/// Reads a file for loading.
pub fn read_image(path: &Path) -> Result<Vec<u8>, LoaderError> {
    std::fs::read(path).map_err(|source| LoaderError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Copies a raw image to the RAM base.
pub fn load_raw(
    mem: &mut PhysMemMap,
    ram_base: u64,
    ram_size: u64,
    image: &[u8],
) -> Result<(), LoaderError> {
    if image.len() as u64 > ram_size {
        return Err(LoaderError::ImageTooBig {
            size: image.len(),
            ram_size: ram_size as usize,
        });
    }
    mem.write_ram(ram_base, image)
        .map_err(|()| LoaderError::SegmentOutOfRange {
            addr: ram_base,
            size: image.len() as u64,
        })
}

/// Loads an ELF image, placing each PT_LOAD segment and validating the
/// entry point against the RAM base.
pub fn load_elf(
    mem: &mut PhysMemMap,
    ram_base: u64,
    image: &[u8],
    path: &Path,
) -> Result<(), LoaderError> {
    let file = object::File::parse(image).map_err(|source| LoaderError::Elf {
        path: path.display().to_string(),
        source,
    })?;

    let entry = file.entry();
    if entry != ram_base {
        return Err(LoaderError::BadEntryPoint {
            entry,
            ram_base,
        });
    }

    for segment in file.segments() {
        let addr = segment.address();
        let data = segment.data().map_err(|source| LoaderError::Elf {
            path: path.display().to_string(),
            source,
        })?;
        if data.is_empty() {
            continue;
        }
        tracing::debug!(
            addr = format_args!("{addr:#x}"),
            len = data.len(),
            "loading ELF segment"
        );
        mem.write_ram(addr, data)
            .map_err(|()| LoaderError::SegmentOutOfRange {
                addr,
                size: data.len() as u64,
            })?;
    }
    Ok(())
}
