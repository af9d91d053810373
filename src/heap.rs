//! Local and global heaps.
//!
//! The local heap stores the name strings referenced by symbol-table
//! entries; the global heap stores variable-length payloads referenced by
//! vlen elements. Both are cached per address by the file facade: a
//! single dataset may hold thousands of vlen references into one
//! collection, and group walks resolve every child name through the same
//! heap.

use std::collections::HashMap;

use nom::bytes::streaming::{tag, take};
use nom::error::context;
use nom::number::streaming::{le_u16, le_u8};

use crate::error::Error;
use crate::parse::{self, offset};
use crate::source::ByteSource;

#[derive(Debug, Clone)]
pub struct LocalHeap {
    pub version: u8,
    pub data_segment_size: u64,
    pub data_segment_address: u64,
}

pub fn local_heap<'a>(
    offset_size: u8,
    length_size: u8,
) -> impl Fn(&'a [u8]) -> parse::Result<'a, LocalHeap> {
    move |input| {
        context("local heap", |input| {
            let (input, _) = tag(b"HEAP")(input)?;
            let (input, version) = le_u8(input)?;
            let (input, _) = take(3usize)(input)?;
            let (input, data_segment_size) = offset(length_size)(input)?;
            let (input, _free_list_head) = offset(length_size)(input)?;
            let (input, data_segment_address) = offset(offset_size)(input)?;
            Ok((
                input,
                LocalHeap {
                    version,
                    data_segment_size,
                    data_segment_address,
                },
            ))
        })(input)
    }
}

impl LocalHeap {
    /// The NUL-terminated string at `offset` within the data segment.
    pub fn string_at(&self, source: &ByteSource, offset: u64) -> Result<String, Error> {
        if offset >= self.data_segment_size {
            return Err(Error::Corrupt(format!(
                "name offset {} beyond local heap segment of {} bytes",
                offset, self.data_segment_size
            )));
        }
        let data = source.slice_at(self.data_segment_address + offset)?;
        let limit = ((self.data_segment_size - offset) as usize).min(data.len());
        let window = &data[..limit];
        match window.iter().position(|b| *b == 0) {
            Some(end) => Ok(String::from_utf8_lossy(&window[..end]).into_owned()),
            None => Err(Error::Corrupt("unterminated local heap string".into())),
        }
    }
}

/// A fully parsed `GCOL` collection.
#[derive(Debug)]
pub struct GlobalHeap {
    pub address: u64,
    objects: HashMap<u16, Vec<u8>>,
}

impl GlobalHeap {
    pub fn read(source: &ByteSource, length_size: u8, address: u64) -> Result<GlobalHeap, Error> {
        let data = source.slice_at(address)?;
        let (rest, _) = tag(b"GCOL")(data).map_err(Error::from)?;
        let (rest, version) = le_u8(rest).map_err(Error::from)?;
        if version != 1 {
            return Err(Error::Corrupt(format!(
                "global heap collection version {}",
                version
            )));
        }
        let (rest, _) = take(3usize)(rest).map_err(Error::from)?;
        let (_, collection_size) = offset(length_size)(rest).map_err(Error::from)?;
        let header_len = 8 + length_size as usize;
        if (collection_size as usize) < header_len {
            return Err(Error::Corrupt("global heap collection size".into()));
        }
        if collection_size as usize > data.len() {
            return Err(Error::TruncatedFile);
        }
        let area = &data[header_len..collection_size as usize];
        let object_header_len = 8 + length_size as usize;

        let mut objects = HashMap::new();
        let mut pos = 0usize;
        while pos + object_header_len <= area.len() {
            let input = &area[pos..];
            let (input, index) = le_u16(input).map_err(Error::from)?;
            let (input, _reference_count) = le_u16(input).map_err(Error::from)?;
            let (input, _) = take(4usize)(input).map_err(Error::from)?;
            let (input, size) = offset(length_size)(input).map_err(Error::from)?;
            // Object index 0 marks the collection's free space.
            if index == 0 {
                break;
            }
            if size as usize > input.len() {
                return Err(Error::TruncatedFile);
            }
            objects.insert(index, input[..size as usize].to_vec());
            pos += object_header_len + parse::pad8(size as usize);
        }
        log::trace!(
            "global heap at {:#x}: {} objects in {} bytes",
            address,
            objects.len(),
            collection_size
        );
        Ok(GlobalHeap { address, objects })
    }

    pub fn object(&self, index: u16) -> Result<&[u8], Error> {
        self.objects
            .get(&index)
            .map(|v| v.as_slice())
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "global heap object {} not present in collection at {:#x}",
                    index, self.address
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
