//! Data layout decoding and the chunk assembler.
//!
//! A dataset's bytes live inline (compact), at one address (contiguous)
//! or scattered across filtered chunks indexed by a v1 B-tree. Reads
//! assemble a row-major byte image of the requested hyperslab; element
//! decoding happens afterwards, over that image.

use nom::bytes::streaming::take;
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u8};

use crate::btree::{self, ChunkEntry};
use crate::error::Error;
use crate::filter::FilterPipeline;
use crate::parse::{self, offset, Widths};
use crate::source::ByteSource;

#[derive(Debug, Clone)]
pub enum DataLayout {
    Compact {
        data: Vec<u8>,
    },
    Contiguous {
        address: u64,
        size: u64,
    },
    Chunked {
        index: ChunkIndex,
        /// Per-axis chunk shape. The trailing entry is the element size
        /// in bytes; only the leading entries index the chunk lattice.
        chunk_dims: Vec<u32>,
    },
}

#[derive(Debug, Clone)]
pub enum ChunkIndex {
    BtreeV1 {
        address: u64,
    },
    /// Layout v4: the dataset fits in one chunk. `size` and
    /// `filter_mask` are only meaningful when the chunk is filtered.
    Single {
        address: u64,
        size: u64,
        filter_mask: u32,
    },
    /// Layout v4: unfiltered chunks at consecutive addresses.
    Implicit {
        address: u64,
    },
}

pub fn data_layout(input: &[u8], w: Widths) -> parse::EResult<'_, DataLayout> {
    let (input, version) = le_u8(input)?;
    match version {
        1 | 2 => {
            let (input, dimensionality) = le_u8(input)?;
            let (input, class) = le_u8(input)?;
            let (input, _) = take(5usize)(input)?;
            match class {
                0 => {
                    let (input, _dims) = count(le_u32, dimensionality as usize)(input)?;
                    let (input, size) = le_u32(input)?;
                    let (input, data) = take(size as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Compact {
                            data: data.to_vec(),
                        },
                    ))
                }
                1 => {
                    let (input, address) = offset(w.offset)(input)?;
                    // Dimension sizes are element counts at this version,
                    // not bytes; readers size the storage from the
                    // dataspace and datatype instead.
                    let (input, dims) = count(le_u32, dimensionality as usize)(input)?;
                    let size = dims.iter().map(|d| u64::from(*d)).product();
                    Ok((input, DataLayout::Contiguous { address, size }))
                }
                2 => {
                    // Dimensionality is rank + 1 here, with the element
                    // size as the final chunk dimension, same as v3.
                    let (input, address) = offset(w.offset)(input)?;
                    let (input, chunk_dims) = count(le_u32, dimensionality as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Chunked {
                            index: ChunkIndex::BtreeV1 { address },
                            chunk_dims,
                        },
                    ))
                }
                c => Err(Error::Corrupt(format!("data layout class {}", c))),
            }
        }
        3 => {
            let (input, class) = le_u8(input)?;
            match class {
                0 => {
                    let (input, size) = le_u16(input)?;
                    let (input, data) = take(size as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Compact {
                            data: data.to_vec(),
                        },
                    ))
                }
                1 => {
                    let (input, address) = offset(w.offset)(input)?;
                    let (input, size) = offset(w.length)(input)?;
                    Ok((input, DataLayout::Contiguous { address, size }))
                }
                2 => {
                    let (input, dimensionality) = le_u8(input)?;
                    let (input, address) = offset(w.offset)(input)?;
                    let (input, chunk_dims) = count(le_u32, dimensionality as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Chunked {
                            index: ChunkIndex::BtreeV1 { address },
                            chunk_dims,
                        },
                    ))
                }
                c => Err(Error::Corrupt(format!("data layout class {}", c))),
            }
        }
        4 => {
            let (input, class) = le_u8(input)?;
            match class {
                0 => {
                    let (input, size) = le_u16(input)?;
                    let (input, data) = take(size as usize)(input)?;
                    Ok((
                        input,
                        DataLayout::Compact {
                            data: data.to_vec(),
                        },
                    ))
                }
                1 => {
                    let (input, address) = offset(w.offset)(input)?;
                    let (input, size) = offset(w.length)(input)?;
                    Ok((input, DataLayout::Contiguous { address, size }))
                }
                2 => {
                    let (input, flags) = le_u8(input)?;
                    let (input, dimensionality) = le_u8(input)?;
                    let (input, encoded_length) = le_u8(input)?;
                    let mut chunk_dims = Vec::with_capacity(dimensionality as usize);
                    let mut rest = input;
                    for _ in 0..dimensionality {
                        let (r, raw) = take(encoded_length as usize)(rest)?;
                        chunk_dims.push(parse::le_uint(raw) as u32);
                        rest = r;
                    }
                    let (rest, index_type) = le_u8(rest)?;
                    let (rest, index) = match index_type {
                        1 => {
                            let (rest, size, filter_mask) = if flags & 0x02 != 0 {
                                let (rest, size) = offset(w.length)(rest)?;
                                let (rest, filter_mask) = le_u32(rest)?;
                                (rest, size, filter_mask)
                            } else {
                                (rest, 0, 0)
                            };
                            let (rest, address) = offset(w.offset)(rest)?;
                            (
                                rest,
                                ChunkIndex::Single {
                                    address,
                                    size,
                                    filter_mask,
                                },
                            )
                        }
                        2 => {
                            let (rest, address) = offset(w.offset)(rest)?;
                            (rest, ChunkIndex::Implicit { address })
                        }
                        _ => {
                            return Err(Error::UnsupportedFeature(
                                "layout v4 chunk index other than single or implicit",
                            ))
                        }
                    };
                    Ok((
                        rest,
                        DataLayout::Chunked { index, chunk_dims },
                    ))
                }
                c => Err(Error::Corrupt(format!("data layout class {}", c))),
            }
        }
        v => Err(Error::UnsupportedLayoutVersion(v)),
    }
}

/// A hyperslab: per-axis start, count and step in element units.
#[derive(Debug, Clone)]
pub struct Selection {
    pub starts: Vec<u64>,
    pub counts: Vec<u64>,
    pub steps: Vec<u64>,
}

impl Selection {
    pub fn all(dims: &[u64]) -> Selection {
        Selection {
            starts: vec![0; dims.len()],
            counts: dims.to_vec(),
            steps: vec![1; dims.len()],
        }
    }

    pub fn element_count(&self) -> u64 {
        self.counts.iter().product()
    }

    pub fn validate(&self, dims: &[u64]) -> Result<(), Error> {
        if self.starts.len() != dims.len()
            || self.counts.len() != dims.len()
            || self.steps.len() != dims.len()
        {
            return Err(Error::SliceOutOfBounds(format!(
                "selection rank {} does not match dataset rank {}",
                self.starts.len(),
                dims.len()
            )));
        }
        for axis in 0..dims.len() {
            if self.steps[axis] == 0 {
                return Err(Error::SliceOutOfBounds(format!("step 0 on axis {}", axis)));
            }
            if self.counts[axis] == 0 {
                continue;
            }
            let last = self.starts[axis] + (self.counts[axis] - 1) * self.steps[axis];
            if last >= dims[axis] {
                return Err(Error::SliceOutOfBounds(format!(
                    "axis {}: start {} count {} step {} exceeds extent {}",
                    axis, self.starts[axis], self.counts[axis], self.steps[axis], dims[axis]
                )));
            }
        }
        Ok(())
    }

    /// The input coordinate selected by output index `index` on `axis`.
    fn coordinate(&self, axis: usize, index: u64) -> u64 {
        self.starts[axis] + index * self.steps[axis]
    }

    /// Output-index range `[lo, hi)` on `axis` whose coordinates fall in
    /// `[origin, origin + extent)`.
    fn overlap(&self, axis: usize, origin: u64, extent: u64) -> (u64, u64) {
        let start = self.starts[axis];
        let step = self.steps[axis];
        let end = origin + extent;
        if end <= start {
            return (0, 0);
        }
        let lo = if origin <= start {
            0
        } else {
            (origin - start + step - 1) / step
        };
        let hi = ((end - 1 - start) / step + 1).min(self.counts[axis]);
        (lo, hi.max(lo))
    }
}

/// Row-major linear index of `coords` in an array of extents `dims`.
fn linear_index(coords: &[u64], dims: &[u64]) -> u64 {
    coords
        .iter()
        .zip(dims.iter())
        .fold(0, |acc, (c, d)| acc * d + c)
}

/// Visit every index tuple in the half-open box `[lo, hi)`, last axis
/// fastest. A rank-0 box yields the single empty tuple.
fn for_each_index(lo: &[u64], hi: &[u64], mut visit: impl FnMut(&[u64])) {
    if lo.is_empty() {
        visit(&[]);
        return;
    }
    if lo.iter().zip(hi.iter()).any(|(l, h)| l >= h) {
        return;
    }
    let mut coords = lo.to_vec();
    loop {
        visit(&coords);
        let mut axis = coords.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            coords[axis] += 1;
            if coords[axis] < hi[axis] {
                break;
            }
            coords[axis] = lo[axis];
            if axis == 0 {
                return;
            }
        }
    }
}

/// Fill the output image with the fill-value pattern. A missing or
/// zero-length pattern leaves the zero initialization in place.
pub(crate) fn fill_output(out: &mut [u8], element_size: usize, fill: Option<&[u8]>) {
    if let Some(pattern) = fill {
        if pattern.len() == element_size && pattern.iter().any(|b| *b != 0) {
            for window in out.chunks_mut(element_size) {
                window.copy_from_slice(pattern);
            }
        }
    }
}

/// Gather the selection out of a complete row-major byte image
/// (compact storage, or contiguous storage already sliced).
pub(crate) fn gather(
    raw: &[u8],
    dims: &[u64],
    element_size: usize,
    selection: &Selection,
    out: &mut [u8],
) -> Result<(), Error> {
    let needed = dims.iter().product::<u64>() as usize * element_size;
    if raw.len() < needed {
        return Err(Error::TruncatedFile);
    }
    let lo = vec![0u64; dims.len()];
    let mut out_pos = 0usize;
    let mut coords = Vec::with_capacity(dims.len());
    for_each_index(&lo, &selection.counts, |index| {
        coords.clear();
        for (axis, i) in index.iter().enumerate() {
            coords.push(selection.coordinate(axis, *i));
        }
        let src = linear_index(&coords, dims) as usize * element_size;
        out[out_pos..out_pos + element_size].copy_from_slice(&raw[src..src + element_size]);
        out_pos += element_size;
    });
    Ok(())
}

/// Scatter one decoded chunk's overlap with the selection into the
/// output image.
pub(crate) fn scatter_chunk(
    chunk: &[u8],
    chunk_origin: &[u64],
    chunk_dims: &[u64],
    element_size: usize,
    selection: &Selection,
    out: &mut [u8],
) -> Result<(), Error> {
    let rank = chunk_origin.len();
    let mut lo = Vec::with_capacity(rank);
    let mut hi = Vec::with_capacity(rank);
    for axis in 0..rank {
        let (l, h) = selection.overlap(axis, chunk_origin[axis], chunk_dims[axis]);
        if l >= h {
            return Ok(());
        }
        lo.push(l);
        hi.push(h);
    }
    let chunk_elements = chunk_dims.iter().product::<u64>() as usize;
    if chunk.len() < chunk_elements * element_size {
        return Err(Error::Corrupt(
            "decoded chunk shorter than its shape".into(),
        ));
    }
    let mut relative = Vec::with_capacity(rank);
    for_each_index(&lo, &hi, |index| {
        relative.clear();
        for (axis, i) in index.iter().enumerate() {
            relative.push(selection.coordinate(axis, *i) - chunk_origin[axis]);
        }
        let src = linear_index(&relative, chunk_dims) as usize * element_size;
        let dst = linear_index(index, &selection.counts) as usize * element_size;
        out[dst..dst + element_size].copy_from_slice(&chunk[src..src + element_size]);
    });
    Ok(())
}

/// Enumerate the stored chunks for a chunked layout. The B-tree variant
/// walks the index; the v4 single and implicit variants synthesize
/// entries so the assembler sees one shape of map.
pub(crate) fn chunk_entries(
    source: &ByteSource,
    w: Widths,
    index: &ChunkIndex,
    dims: &[u64],
    chunk_shape: &[u64],
    chunk_bytes: u64,
) -> Result<Vec<ChunkEntry>, Error> {
    match index {
        ChunkIndex::BtreeV1 { address } => {
            let mut entries = Vec::new();
            if *address != parse::UNDEFINED_ADDRESS {
                let mut cursor = source.cursor(*address);
                btree::walk_chunk_btree(
                    &mut cursor,
                    w.offset,
                    chunk_shape.len() + 1,
                    *address,
                    &mut entries,
                )?;
            }
            Ok(entries)
        }
        ChunkIndex::Single {
            address,
            size,
            filter_mask,
        } => {
            if *address == parse::UNDEFINED_ADDRESS {
                return Ok(Vec::new());
            }
            let stored = if *size == 0 { chunk_bytes } else { *size };
            let mut offsets = vec![0u64; chunk_shape.len()];
            offsets.push(0);
            Ok(vec![ChunkEntry {
                key: btree::ChunkKey {
                    chunk_size: stored as u32,
                    filter_mask: *filter_mask,
                    offsets,
                },
                address: *address,
            }])
        }
        ChunkIndex::Implicit { address } => {
            if *address == parse::UNDEFINED_ADDRESS {
                return Ok(Vec::new());
            }
            let mut entries = Vec::new();
            let grid: Vec<u64> = dims
                .iter()
                .zip(chunk_shape.iter())
                .map(|(d, c)| (d + c - 1) / c)
                .collect();
            let lo = vec![0u64; grid.len()];
            let mut ordinal = 0u64;
            for_each_index(&lo, &grid, |index| {
                let mut offsets: Vec<u64> = index
                    .iter()
                    .zip(chunk_shape.iter())
                    .map(|(i, c)| i * c)
                    .collect();
                offsets.push(0);
                entries.push(ChunkEntry {
                    key: btree::ChunkKey {
                        chunk_size: chunk_bytes as u32,
                        filter_mask: 0,
                        offsets,
                    },
                    address: address + ordinal * chunk_bytes,
                });
                ordinal += 1;
            });
            Ok(entries)
        }
    }
}

/// Assemble the row-major byte image of `selection` from chunked storage.
/// `entries` is the dataset's chunk map, usually served from the per-file
/// cache.
pub(crate) fn assemble_chunked(
    source: &ByteSource,
    entries: &[ChunkEntry],
    pipeline: Option<&FilterPipeline>,
    chunk_shape: &[u64],
    element_size: usize,
    selection: &Selection,
    out: &mut [u8],
) -> Result<(), Error> {
    let chunk_elements: u64 = chunk_shape.iter().product();
    let chunk_bytes = chunk_elements * element_size as u64;
    log::debug!(
        "assembling {} chunk(s) of shape {:?} for selection {:?}",
        entries.len(),
        chunk_shape,
        selection.counts
    );
    for entry in entries {
        let origin = &entry.key.offsets[..chunk_shape.len()];
        // Skip chunks outside the selection before touching their bytes.
        let overlaps = (0..chunk_shape.len()).all(|axis| {
            let (l, h) = selection.overlap(axis, origin[axis], chunk_shape[axis]);
            l < h
        });
        if !overlaps {
            continue;
        }
        let decoded = match pipeline {
            Some(pipeline) => {
                let stored = source.slice_at(entry.address)?;
                if stored.len() < entry.key.chunk_size as usize {
                    return Err(Error::TruncatedFile);
                }
                pipeline.decode(
                    stored[..entry.key.chunk_size as usize].to_vec(),
                    entry.key.filter_mask,
                )?
            }
            None => {
                let stored = source.slice_at(entry.address)?;
                if (stored.len() as u64) < chunk_bytes {
                    return Err(Error::TruncatedFile);
                }
                stored[..chunk_bytes as usize].to_vec()
            }
        };
        scatter_chunk(
            &decoded,
            origin,
            chunk_shape,
            element_size,
            selection,
            out,
        )?;
    }
    Ok(())
}
