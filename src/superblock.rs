//! Superblock discovery and decoding.
//!
//! The signature may sit at offset 0 (native files) or at 512, 1024, …
//! (MATLAB v7.3 wraps the HDF5 region behind a 512-byte header). Every
//! address stored in the file is relative to wherever the signature was
//! found.

use nom::bytes::streaming::{tag, take};
use nom::number::streaming::{le_u16, le_u32, le_u8};

use crate::btree::symbol_table_entry;
use crate::error::Error;
use crate::parse::{self, offset, Widths};

pub const SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

/// Scan the candidate start offsets (0, then 512 doubling) for the
/// signature. Returns the byte offset of the HDF5 region.
pub fn locate(data: &[u8]) -> Option<usize> {
    let mut candidate = 0usize;
    while candidate + SIGNATURE.len() <= data.len() {
        if data[candidate..candidate + SIGNATURE.len()] == SIGNATURE {
            log::debug!("HDF5 signature found at offset {}", candidate);
            return Some(candidate);
        }
        candidate = if candidate == 0 { 512 } else { candidate * 2 };
    }
    None
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    pub group_leaf_node_k: u16,
    pub group_internal_node_k: u16,
    pub base_address: u64,
    pub end_of_file_address: u64,
    /// Address of the root group's object header.
    pub root_address: u64,
}

impl Superblock {
    pub fn widths(&self) -> Widths {
        Widths {
            offset: self.offset_size,
            length: self.length_size,
        }
    }

    /// Decode the superblock from `data`, which must start at the
    /// signature. `region_len` is the byte length of the HDF5 region and
    /// bounds the recorded end-of-file address.
    pub fn read(data: &[u8], region_len: u64) -> Result<Superblock, Error> {
        let (rest, _) = tag(&SIGNATURE[..])(data).map_err(Error::from)?;
        let (_, version) = le_u8(rest).map_err(Error::from)?;
        let superblock = match version {
            0 | 1 => Self::read_v0(data, version)?,
            2 | 3 => Self::read_v2(data, version)?,
            v => return Err(Error::UnsupportedSuperblockVersion(v)),
        };
        if superblock.offset_size != 4 && superblock.offset_size != 8 {
            return Err(Error::Corrupt(format!(
                "offset size {} is not 4 or 8",
                superblock.offset_size
            )));
        }
        if superblock.length_size != 4 && superblock.length_size != 8 {
            return Err(Error::Corrupt(format!(
                "length size {} is not 4 or 8",
                superblock.length_size
            )));
        }
        if superblock.end_of_file_address != parse::UNDEFINED_ADDRESS
            && superblock.end_of_file_address > region_len
        {
            return Err(Error::TruncatedFile);
        }
        log::debug!(
            "superblock v{}: offsets {} bytes, lengths {} bytes, root at {:#x}",
            superblock.version,
            superblock.offset_size,
            superblock.length_size,
            superblock.root_address
        );
        Ok(superblock)
    }

    fn read_v0(data: &[u8], version: u8) -> Result<Superblock, Error> {
        let input = &data[SIGNATURE.len()..];
        let (input, _version) = le_u8(input)?;
        let (input, _free_space_version) = le_u8(input)?;
        let (input, _root_symbol_table_version) = le_u8(input)?;
        let (input, _) = take(1usize)(input)?;
        let (input, _shared_header_version) = le_u8(input)?;
        let (input, offset_size) = le_u8(input)?;
        let (input, length_size) = le_u8(input)?;
        let (input, _) = take(1usize)(input)?;
        let (input, group_leaf_node_k) = le_u16(input)?;
        let (input, group_internal_node_k) = le_u16(input)?;
        let (input, _file_consistency_flags) = le_u32(input)?;
        let input = if version == 1 {
            let (input, _indexed_storage_k) = le_u16(input)?;
            let (input, _) = take(2usize)(input)?;
            input
        } else {
            input
        };
        let (input, base_address) = offset(offset_size)(input)?;
        let (input, _free_space_address) = offset(offset_size)(input)?;
        let (input, end_of_file_address) = offset(offset_size)(input)?;
        let (input, _driver_information_address) = offset(offset_size)(input)?;
        let (_, root_entry) = symbol_table_entry(offset_size)(input)?;
        Ok(Superblock {
            version,
            offset_size,
            length_size,
            group_leaf_node_k,
            group_internal_node_k,
            base_address,
            end_of_file_address,
            root_address: root_entry.object_header_address,
        })
    }

    fn read_v2(data: &[u8], version: u8) -> Result<Superblock, Error> {
        let input = &data[SIGNATURE.len()..];
        let (input, _version) = le_u8(input)?;
        let (input, offset_size) = le_u8(input)?;
        let (input, length_size) = le_u8(input)?;
        let (input, _file_consistency_flags) = le_u8(input)?;
        let (input, base_address) = offset(offset_size)(input)?;
        let (input, _extension_address) = offset(offset_size)(input)?;
        let (input, end_of_file_address) = offset(offset_size)(input)?;
        let (input, root_address) = offset(offset_size)(input)?;
        let (_, stored_checksum) = le_u32(input)?;
        let covered = SIGNATURE.len() + 4 + 4 * offset_size as usize;
        if parse::lookup3(&data[..covered], 0) != stored_checksum {
            return Err(Error::Corrupt("superblock checksum mismatch".into()));
        }
        Ok(Superblock {
            version,
            offset_size,
            length_size,
            group_leaf_node_k: 0,
            group_internal_node_k: 0,
            base_address,
            end_of_file_address,
            root_address,
        })
    }
}
