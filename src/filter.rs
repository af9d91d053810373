//! The filter pipeline: per-chunk transforms undone at read time.
//!
//! Filters decode in the reverse of their stored order, and the chunk
//! B-tree key's filter mask can exclude individual filters for a chunk.
//! The implemented decode set is deflate (id 1) and shuffle (id 2);
//! anything else fails with `UnsupportedFilter`.

use std::io::Read;

use nom::bytes::streaming::take;
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u8};

use crate::error::Error;
use crate::parse::{self, pad8};

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;

#[derive(Debug, Clone)]
pub struct Filter {
    pub id: u16,
    pub name: String,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    pub filters: Vec<Filter>,
}

pub fn filter_pipeline(input: &[u8]) -> parse::EResult<'_, FilterPipeline> {
    let (input, version) = le_u8(input)?;
    match version {
        1 => {
            let (input, number_of_filters) = le_u8(input)?;
            let (input, _) = take(6usize)(input)?;
            let mut rest = input;
            let mut filters = Vec::with_capacity(number_of_filters as usize);
            for _ in 0..number_of_filters {
                let (r, id) = le_u16(rest)?;
                let (r, name_length) = le_u16(r)?;
                let (r, flags) = le_u16(r)?;
                let (r, client_count) = le_u16(r)?;
                let (r, name_bytes) = take(pad8(name_length as usize))(r)?;
                let (r, client_data) = count(le_u32, client_count as usize)(r)?;
                let r = if client_count % 2 == 1 {
                    take(4usize)(r)?.0
                } else {
                    r
                };
                filters.push(Filter {
                    id,
                    name: parse::cstr(name_bytes),
                    flags,
                    client_data,
                });
                rest = r;
            }
            Ok((rest, FilterPipeline { filters }))
        }
        2 => {
            let (input, number_of_filters) = le_u8(input)?;
            let mut rest = input;
            let mut filters = Vec::with_capacity(number_of_filters as usize);
            for _ in 0..number_of_filters {
                let (r, id) = le_u16(rest)?;
                let (r, name_length) = if id >= 256 {
                    le_u16(r)?
                } else {
                    (r, 0)
                };
                let (r, flags) = le_u16(r)?;
                let (r, client_count) = le_u16(r)?;
                let (r, name_bytes) = take(name_length as usize)(r)?;
                let (r, client_data) = count(le_u32, client_count as usize)(r)?;
                filters.push(Filter {
                    id,
                    name: parse::cstr(name_bytes),
                    flags,
                    client_data,
                });
                rest = r;
            }
            Ok((rest, FilterPipeline { filters }))
        }
        v => Err(Error::Corrupt(format!("filter pipeline version {}", v))),
    }
}

impl FilterPipeline {
    /// Check that every filter in the pipeline is decodable. Used by
    /// directory-style scans to report a dataset as unreadable without
    /// fetching any chunk.
    pub fn validate(&self) -> Result<(), Error> {
        for filter in &self.filters {
            match filter.id {
                FILTER_DEFLATE | FILTER_SHUFFLE => {}
                id => return Err(Error::UnsupportedFilter(id)),
            }
        }
        Ok(())
    }

    /// Undo the pipeline on one chunk. Filters whose bit is set in
    /// `filter_mask` were skipped at write time and are skipped here too.
    pub fn decode(&self, mut data: Vec<u8>, filter_mask: u32) -> Result<Vec<u8>, Error> {
        for (index, filter) in self.filters.iter().enumerate().rev() {
            if filter_mask & (1 << index) != 0 {
                continue;
            }
            data = match filter.id {
                FILTER_DEFLATE => inflate(&data)?,
                FILTER_SHUFFLE => {
                    let element_size = filter
                        .client_data
                        .first()
                        .copied()
                        .ok_or_else(|| {
                            Error::Corrupt("shuffle filter missing element size".into())
                        })?;
                    unshuffle(&data, element_size as usize)
                }
                id => return Err(Error::UnsupportedFilter(id)),
            };
        }
        Ok(data)
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Corrupt(format!("bad deflate stream: {}", e)))?;
    Ok(out)
}

/// Inverse of the shuffle filter's byte transposition: the stored buffer
/// holds all first bytes, then all second bytes, and so on. Bytes past
/// the last whole element are stored untransposed.
fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let elements = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte in 0..element_size {
        let plane = &data[byte * elements..(byte + 1) * elements];
        for (element, value) in plane.iter().enumerate() {
            out[element * element_size + byte] = *value;
        }
    }
    let tail = elements * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    out
}
