//! Object headers: the versioned containers of typed messages.
//!
//! Version 1 headers are count-driven with 8-byte-aligned messages and
//! raw continuation blocks; version 2 headers are `OHDR`-signed with
//! flag-encoded field widths, `OCHK` continuation blocks and lookup3
//! checksums. Parsing yields the flat, in-order message list across all
//! continuations; unknown message types are skipped by their size field.

use std::collections::VecDeque;

use nom::bytes::streaming::{tag, take};
use nom::number::streaming::{le_u16, le_u32, le_u8};

use crate::dataset::{data_layout, DataLayout};
use crate::dataspace::{dataspace, Dataspace};
use crate::datatype::{datatype, Datatype};
use crate::error::Error;
use crate::filter::{filter_pipeline, FilterPipeline};
use crate::group::{group_info, link_info, link_message, GroupInfo, Link, LinkInfo};
use crate::parse::{self, offset, pad8, Widths};
use crate::source::ByteSource;

pub const MSG_NIL: u16 = 0x0000;
pub const MSG_DATASPACE: u16 = 0x0001;
pub const MSG_LINK_INFO: u16 = 0x0002;
pub const MSG_DATATYPE: u16 = 0x0003;
pub const MSG_FILL_VALUE: u16 = 0x0005;
pub const MSG_LINK: u16 = 0x0006;
pub const MSG_DATA_LAYOUT: u16 = 0x0008;
pub const MSG_GROUP_INFO: u16 = 0x000A;
pub const MSG_FILTER_PIPELINE: u16 = 0x000B;
pub const MSG_ATTRIBUTE: u16 = 0x000C;
pub const MSG_CONTINUATION: u16 = 0x0010;
pub const MSG_SYMBOL_TABLE: u16 = 0x0011;
pub const MSG_MODIFICATION_TIME: u16 = 0x0012;

#[derive(Debug, Clone)]
pub struct FillValue {
    pub version: u8,
    pub defined: bool,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValue(FillValue),
    Link(Link),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(FilterPipeline),
    Attribute(AttributeMessage),
    Continuation { address: u64, length: u64 },
    SymbolTable { btree_address: u64, local_heap_address: u64 },
    ModificationTime { seconds: u32 },
    Unknown { message_type: u16 },
}

#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub version: u8,
    pub messages: Vec<Message>,
}

impl ObjectHeader {
    pub fn dataspace(&self) -> Option<&Dataspace> {
        self.messages.iter().find_map(|m| match m {
            Message::Dataspace(d) => Some(d),
            _ => None,
        })
    }

    pub fn datatype(&self) -> Option<&Datatype> {
        self.messages.iter().find_map(|m| match m {
            Message::Datatype(d) => Some(d),
            _ => None,
        })
    }

    pub fn layout(&self) -> Option<&DataLayout> {
        self.messages.iter().find_map(|m| match m {
            Message::DataLayout(l) => Some(l),
            _ => None,
        })
    }

    pub fn fill_value(&self) -> Option<&FillValue> {
        self.messages.iter().find_map(|m| match m {
            Message::FillValue(f) => Some(f),
            _ => None,
        })
    }

    pub fn pipeline(&self) -> Option<&FilterPipeline> {
        self.messages.iter().find_map(|m| match m {
            Message::FilterPipeline(p) => Some(p),
            _ => None,
        })
    }

    pub fn symbol_table(&self) -> Option<(u64, u64)> {
        self.messages.iter().find_map(|m| match m {
            Message::SymbolTable {
                btree_address,
                local_heap_address,
            } => Some((*btree_address, *local_heap_address)),
            _ => None,
        })
    }

    pub fn link_info(&self) -> Option<&LinkInfo> {
        self.messages.iter().find_map(|m| match m {
            Message::LinkInfo(i) => Some(i),
            _ => None,
        })
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeMessage> {
        self.messages.iter().filter_map(|m| match m {
            Message::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn modification_time(&self) -> Option<u32> {
        self.messages.iter().find_map(|m| match m {
            Message::ModificationTime { seconds } => Some(*seconds),
            _ => None,
        })
    }

    /// Datasets carry a datatype and a dataspace; everything else
    /// reachable through links is treated as a group.
    pub fn is_dataset(&self) -> bool {
        self.datatype().is_some() && self.dataspace().is_some()
    }
}

/// Read the object header at `address`, following continuations.
pub fn read_object_header(
    source: &ByteSource,
    w: Widths,
    address: u64,
) -> Result<ObjectHeader, Error> {
    let data = source.slice_at(address)?;
    if data.len() < 4 {
        return Err(Error::TruncatedFile);
    }
    if &data[..4] == b"OHDR" {
        read_v2(source, w, address)
    } else {
        match data[0] {
            1 => read_v1(source, w, address),
            v => Err(Error::UnsupportedObjectHeaderVersion(v)),
        }
    }
}

fn read_v1(source: &ByteSource, w: Widths, address: u64) -> Result<ObjectHeader, Error> {
    let mut cursor = source.cursor(address);
    let _version = cursor.read_u8()?;
    cursor.skip(1)?;
    let total_messages = cursor.read_u16()?;
    let _reference_count = cursor.read_u32()?;
    let header_size = cursor.read_u32()?;
    // The message area begins at the next 8-byte boundary.
    cursor.skip(4)?;

    let mut blocks = VecDeque::new();
    blocks.push_back((cursor.position(), u64::from(header_size)));
    let mut messages = Vec::new();
    let mut remaining = total_messages as usize;
    while let Some((block_address, block_length)) = blocks.pop_front() {
        let block = source.slice_at(block_address)?;
        if block.len() < block_length as usize {
            return Err(Error::TruncatedFile);
        }
        let mut input = &block[..block_length as usize];
        while remaining > 0 && input.len() >= 8 {
            let (rest, message_type) = le_u16(input)?;
            let (rest, size) = le_u16(rest)?;
            let (rest, _flags) = le_u8(rest)?;
            let (rest, _) = take(3usize)(rest)?;
            if rest.len() < size as usize {
                return Err(Error::TruncatedFile);
            }
            let payload = &rest[..size as usize];
            let message = decode_message(message_type, payload, w)?;
            if let Message::Continuation { address, length } = message {
                blocks.push_back((address, length));
            }
            messages.push(message);
            remaining -= 1;
            let advance = pad8(size as usize).min(rest.len());
            input = &rest[advance..];
        }
    }
    if remaining > 0 {
        return Err(Error::Corrupt(format!(
            "object header ended with {} message(s) unaccounted for",
            remaining
        )));
    }
    Ok(ObjectHeader {
        version: 1,
        messages,
    })
}

fn read_v2(source: &ByteSource, w: Widths, address: u64) -> Result<ObjectHeader, Error> {
    let data = source.slice_at(address)?;
    let (rest, _) = tag(b"OHDR")(data).map_err(Error::from)?;
    let (rest, version) = le_u8(rest).map_err(Error::from)?;
    if version != 2 {
        return Err(Error::UnsupportedObjectHeaderVersion(version));
    }
    let (mut rest, flags) = le_u8(rest).map_err(Error::from)?;
    if flags & 0x20 != 0 {
        rest = take(16usize)(rest).map_err(Error::from)?.0; // four timestamps
    }
    if flags & 0x10 != 0 {
        rest = take(4usize)(rest).map_err(Error::from)?.0; // compact/dense thresholds
    }
    let chunk_size_width = 1usize << (flags & 0x03);
    let (rest, chunk0_raw) = take(chunk_size_width)(rest).map_err(Error::from)?;
    let chunk0_size = parse::le_uint(chunk0_raw) as usize;
    let prefix_len = data.len() - rest.len();
    let track_order = flags & 0x04 != 0;

    let covered = prefix_len + chunk0_size;
    if data.len() < covered + 4 {
        return Err(Error::TruncatedFile);
    }
    verify_checksum(&data[..covered], &data[covered..covered + 4])?;

    let mut messages = Vec::new();
    let mut blocks = VecDeque::new();
    parse_v2_messages(
        &data[prefix_len..covered],
        track_order,
        w,
        &mut messages,
        &mut blocks,
    )?;
    while let Some((block_address, block_length)) = blocks.pop_front() {
        let block = source.slice_at(block_address)?;
        let block_length = block_length as usize;
        if block.len() < block_length {
            return Err(Error::TruncatedFile);
        }
        if block_length < 8 {
            return Err(Error::Corrupt("continuation block too small".into()));
        }
        let block = &block[..block_length];
        tag(b"OCHK")(block).map_err(Error::from)?;
        verify_checksum(&block[..block_length - 4], &block[block_length - 4..])?;
        parse_v2_messages(
            &block[4..block_length - 4],
            track_order,
            w,
            &mut messages,
            &mut blocks,
        )?;
    }
    Ok(ObjectHeader {
        version: 2,
        messages,
    })
}

fn verify_checksum(covered: &[u8], stored: &[u8]) -> Result<(), Error> {
    let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    if parse::lookup3(covered, 0) != stored {
        return Err(Error::Corrupt("metadata block checksum mismatch".into()));
    }
    Ok(())
}

fn parse_v2_messages(
    mut input: &[u8],
    track_order: bool,
    w: Widths,
    messages: &mut Vec<Message>,
    blocks: &mut VecDeque<(u64, u64)>,
) -> Result<(), Error> {
    let header_len = if track_order { 6 } else { 4 };
    while input.len() >= header_len {
        let (rest, message_type) = le_u8(input)?;
        let (rest, size) = le_u16(rest)?;
        let (rest, _flags) = le_u8(rest)?;
        let rest = if track_order { &rest[2..] } else { rest };
        if rest.len() < size as usize {
            return Err(Error::TruncatedFile);
        }
        let payload = &rest[..size as usize];
        let message = decode_message(u16::from(message_type), payload, w)?;
        if let Message::Continuation { address, length } = message {
            blocks.push_back((address, length));
        }
        messages.push(message);
        input = &rest[size as usize..];
    }
    Ok(())
}

fn decode_message(message_type: u16, payload: &[u8], w: Widths) -> Result<Message, Error> {
    Ok(match message_type {
        MSG_NIL => Message::Nil,
        MSG_DATASPACE => Message::Dataspace(dataspace(payload, w.length)?.1),
        MSG_LINK_INFO => Message::LinkInfo(link_info(payload, w)?.1),
        MSG_DATATYPE => Message::Datatype(datatype(payload)?.1),
        MSG_FILL_VALUE => Message::FillValue(fill_value(payload)?.1),
        MSG_LINK => Message::Link(link_message(payload, w)?.1),
        MSG_DATA_LAYOUT => Message::DataLayout(data_layout(payload, w)?.1),
        MSG_GROUP_INFO => Message::GroupInfo(group_info(payload)?.1),
        MSG_FILTER_PIPELINE => Message::FilterPipeline(filter_pipeline(payload)?.1),
        MSG_ATTRIBUTE => Message::Attribute(attribute(payload, w)?),
        MSG_CONTINUATION => {
            let (rest, address) = offset(w.offset)(payload)?;
            let (_, length) = offset(w.length)(rest)?;
            Message::Continuation { address, length }
        }
        MSG_SYMBOL_TABLE => {
            let (rest, btree_address) = offset(w.offset)(payload)?;
            let (_, local_heap_address) = offset(w.offset)(rest)?;
            Message::SymbolTable {
                btree_address,
                local_heap_address,
            }
        }
        MSG_MODIFICATION_TIME => {
            let (rest, version) = le_u8(payload)?;
            if version != 1 {
                return Err(Error::Corrupt(format!(
                    "modification time version {}",
                    version
                )));
            }
            let (rest, _) = take(3usize)(rest)?;
            let (_, seconds) = le_u32(rest)?;
            Message::ModificationTime { seconds }
        }
        t => {
            log::trace!("skipping unknown header message type {:#06x}", t);
            Message::Unknown { message_type: t }
        }
    })
}

pub fn fill_value(input: &[u8]) -> parse::EResult<'_, FillValue> {
    let (input, version) = le_u8(input)?;
    match version {
        1 | 2 => {
            let (input, _space_allocation_time) = le_u8(input)?;
            let (input, _write_time) = le_u8(input)?;
            let (input, defined) = le_u8(input)?;
            if version == 1 || defined != 0 {
                let (input, size) = le_u32(input)?;
                let (input, bytes) = take(size as usize)(input)?;
                Ok((
                    input,
                    FillValue {
                        version,
                        defined: defined != 0,
                        bytes: bytes.to_vec(),
                    },
                ))
            } else {
                Ok((
                    input,
                    FillValue {
                        version,
                        defined: false,
                        bytes: Vec::new(),
                    },
                ))
            }
        }
        3 => {
            let (input, flags) = le_u8(input)?;
            if flags & 0x20 != 0 {
                let (input, size) = le_u32(input)?;
                let (input, bytes) = take(size as usize)(input)?;
                Ok((
                    input,
                    FillValue {
                        version,
                        defined: true,
                        bytes: bytes.to_vec(),
                    },
                ))
            } else {
                Ok((
                    input,
                    FillValue {
                        version,
                        defined: false,
                        bytes: Vec::new(),
                    },
                ))
            }
        }
        v => Err(Error::Corrupt(format!("fill value version {}", v))),
    }
}

fn advance(input: &[u8], n: usize) -> Result<&[u8], Error> {
    if n > input.len() {
        return Err(Error::TruncatedFile);
    }
    Ok(&input[n..])
}

fn attribute(payload: &[u8], w: Widths) -> Result<AttributeMessage, Error> {
    let (input, version) = le_u8(payload)?;
    match version {
        1 => {
            let (input, _) = take(1usize)(input)?;
            let (input, name_size) = le_u16(input)?;
            let (input, datatype_size) = le_u16(input)?;
            let (input, dataspace_size) = le_u16(input)?;
            let (_, name_bytes) = take(name_size as usize)(input)?;
            let name = parse::cstr(name_bytes);
            let input = advance(input, pad8(name_size as usize))?;
            let (_, dtype) = datatype(input)?;
            let input = advance(input, pad8(datatype_size as usize))?;
            let (_, dspace) = dataspace(input, w.length)?;
            let input = advance(input, pad8(dataspace_size as usize))?;
            Ok(AttributeMessage {
                name,
                datatype: dtype,
                dataspace: dspace,
                data: input.to_vec(),
            })
        }
        2 | 3 => {
            let (input, flags) = le_u8(input)?;
            if flags & 0x03 != 0 {
                return Err(Error::UnsupportedFeature(
                    "shared attribute datatype or dataspace",
                ));
            }
            let (input, name_size) = le_u16(input)?;
            let (input, datatype_size) = le_u16(input)?;
            let (input, dataspace_size) = le_u16(input)?;
            let input = if version == 3 {
                take(1usize)(input)?.0 // name character set
            } else {
                input
            };
            let (_, name_bytes) = take(name_size as usize)(input)?;
            let name = parse::cstr(name_bytes);
            let input = advance(input, name_size as usize)?;
            let (_, dtype) = datatype(input)?;
            let input = advance(input, datatype_size as usize)?;
            let (_, dspace) = dataspace(input, w.length)?;
            let input = advance(input, dataspace_size as usize)?;
            Ok(AttributeMessage {
                name,
                datatype: dtype,
                dataspace: dspace,
                data: input.to_vec(),
            })
        }
        v => Err(Error::Corrupt(format!("attribute message version {}", v))),
    }
}
