//! Shared fixture builder for the integration tests.
//!
//! Assembles real HDF5 byte images in memory (superblock, heaps, B-trees,
//! object headers, zlib-compressed chunks) so the reader is exercised
//! against the genuine on-disk layout without Python, MATLAB or the
//! reference C library.
#![allow(dead_code)]

use std::io::Write;

pub const SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";
const SUPERBLOCK_V0_LEN: usize = 96;
const SUPERBLOCK_V2_LEN: usize = 48;

pub struct FileBuilder {
    buf: Vec<u8>,
    reserved: usize,
}

impl FileBuilder {
    /// Reserve space for a version-0 superblock at offset 0.
    pub fn new() -> Self {
        FileBuilder {
            buf: vec![0; SUPERBLOCK_V0_LEN],
            reserved: SUPERBLOCK_V0_LEN,
        }
    }

    /// Reserve space for a version-2 superblock at offset 0.
    pub fn new_v2() -> Self {
        FileBuilder {
            buf: vec![0; SUPERBLOCK_V2_LEN],
            reserved: SUPERBLOCK_V2_LEN,
        }
    }

    fn align8(&mut self) {
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
    }

    /// Append a structure at the next 8-byte boundary; returns its
    /// address.
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        self.align8();
        let address = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        address
    }

    /// Write the version-0 superblock and return the finished image.
    pub fn finish(mut self, root_header_address: u64) -> Vec<u8> {
        assert_eq!(self.reserved, SUPERBLOCK_V0_LEN);
        let eof = self.buf.len() as u64;
        let mut sb = Vec::with_capacity(SUPERBLOCK_V0_LEN);
        sb.extend_from_slice(SIGNATURE);
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes()); // leaf k
        sb.extend_from_slice(&16u16.to_le_bytes()); // internal k
        sb.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
        sb.extend_from_slice(&0u64.to_le_bytes()); // base address
        sb.extend_from_slice(&[0xFF; 8]); // free-space info
        sb.extend_from_slice(&eof.to_le_bytes());
        sb.extend_from_slice(&[0xFF; 8]); // driver info
        // Root group symbol table entry.
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&root_header_address.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        sb.extend_from_slice(&[0; 4]);
        sb.extend_from_slice(&[0; 16]);
        assert_eq!(sb.len(), SUPERBLOCK_V0_LEN);
        self.buf[..SUPERBLOCK_V0_LEN].copy_from_slice(&sb);
        self.buf
    }

    /// Write the version-2 superblock (with checksum) and return the
    /// finished image.
    pub fn finish_v2(mut self, root_header_address: u64) -> Vec<u8> {
        assert_eq!(self.reserved, SUPERBLOCK_V2_LEN);
        let eof = self.buf.len() as u64;
        let mut sb = Vec::with_capacity(SUPERBLOCK_V2_LEN);
        sb.extend_from_slice(SIGNATURE);
        sb.extend_from_slice(&[2, 8, 8, 0]);
        sb.extend_from_slice(&0u64.to_le_bytes()); // base address
        sb.extend_from_slice(&[0xFF; 8]); // superblock extension
        sb.extend_from_slice(&eof.to_le_bytes());
        sb.extend_from_slice(&root_header_address.to_le_bytes());
        let checksum = purehdf::lookup3(&sb, 0);
        sb.extend_from_slice(&checksum.to_le_bytes());
        assert_eq!(sb.len(), SUPERBLOCK_V2_LEN);
        self.buf[..SUPERBLOCK_V2_LEN].copy_from_slice(&sb);
        self.buf
    }
}

/// Prefix an image with the 512-byte MATLAB v7.3 wrapper. Addresses in
/// the image are relative to the HDF5 start, so no relocation is needed.
pub fn matlab_wrap(image: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 512];
    let banner = b"MATLAB 7.3 MAT-file, created for reader tests";
    out[..banner.len()].copy_from_slice(banner);
    out[124] = 0x00;
    out[125] = 0x02;
    out[126] = b'I';
    out[127] = b'M';
    out.extend_from_slice(image);
    out
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Frame a version-1 object header message (padded to 8 bytes).
pub fn message(message_type: u16, payload: &[u8]) -> Vec<u8> {
    let padded = pad8(payload.len());
    let mut out = Vec::with_capacity(8 + padded);
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&(padded as u16).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(payload);
    out.resize(8 + padded, 0);
    out
}

pub fn object_header_v1(messages: &[Vec<u8>]) -> Vec<u8> {
    let area: Vec<u8> = messages.concat();
    let mut out = Vec::with_capacity(16 + area.len());
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(area.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&area);
    out
}

pub fn object_header_v2(messages: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut area = Vec::new();
    for (message_type, payload) in messages {
        area.push(*message_type);
        area.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        area.push(0);
        area.extend_from_slice(payload);
    }
    let mut out = Vec::new();
    out.extend_from_slice(b"OHDR");
    out.push(2);
    out.push(0x01); // two-byte chunk-0 size
    out.extend_from_slice(&(area.len() as u16).to_le_bytes());
    out.extend_from_slice(&area);
    let checksum = purehdf::lookup3(&out, 0);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

pub fn dataspace_v1(dims: &[u64]) -> Vec<u8> {
    let mut out = vec![1, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    for d in dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    out
}

pub fn datatype_fixed(size: u32, signed: bool) -> Vec<u8> {
    let mut out = vec![0x10, if signed { 0x08 } else { 0x00 }, 0, 0];
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&((size * 8) as u16).to_le_bytes());
    out
}

/// The h5py boolean encoding: a 1-byte integer with 1-bit precision.
pub fn datatype_boolean() -> Vec<u8> {
    let mut out = vec![0x10, 0x00, 0, 0];
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out
}

pub fn datatype_f64() -> Vec<u8> {
    let mut out = vec![0x11, 0x20, 0x3F, 0];
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&[52, 11, 0, 52]);
    out.extend_from_slice(&1023u32.to_le_bytes());
    out
}

pub fn datatype_f32() -> Vec<u8> {
    let mut out = vec![0x11, 0x20, 0x1F, 0];
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&[23, 8, 0, 23]);
    out.extend_from_slice(&127u32.to_le_bytes());
    out
}

pub fn datatype_string(size: u32) -> Vec<u8> {
    let mut out = vec![0x13, 0x00, 0, 0];
    out.extend_from_slice(&size.to_le_bytes());
    out
}

pub fn datatype_time64() -> Vec<u8> {
    let mut out = vec![0x12, 0x00, 0, 0];
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out
}

pub fn datatype_vlen_string() -> Vec<u8> {
    let mut out = vec![0x19, 0x01, 0x00, 0];
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&datatype_string(1));
    out
}

pub fn datatype_vlen(base: &[u8]) -> Vec<u8> {
    let mut out = vec![0x19, 0x00, 0x00, 0];
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(base);
    out
}

pub fn datatype_enum_int32(members: &[(&str, i32)]) -> Vec<u8> {
    let mut out = vec![0x18, members.len() as u8, 0, 0];
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&datatype_fixed(4, true));
    for (name, _) in members {
        let start = out.len();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.resize(start + pad8(name.len() + 1), 0);
    }
    for (_, value) in members {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Version-1 compound `{x: int32 at 0, y: float64 at 8}`, 16 bytes.
pub fn datatype_compound_x_y() -> Vec<u8> {
    let mut out = vec![0x16, 2, 0, 0];
    out.extend_from_slice(&16u32.to_le_bytes());
    let members: [(&str, u32, Vec<u8>); 2] = [
        ("x", 0, datatype_fixed(4, true)),
        ("y", 8, datatype_f64()),
    ];
    for (name, offset, dt) in &members {
        let start = out.len();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.resize(start + pad8(name.len() + 1), 0);
        out.extend_from_slice(&offset.to_le_bytes());
        out.push(0); // dimensionality
        out.extend_from_slice(&[0; 3]);
        out.extend_from_slice(&[0; 8]); // permutation + reserved
        out.extend_from_slice(&[0; 16]); // legacy dim sizes
        out.extend_from_slice(dt);
    }
    out
}

pub fn layout_contiguous(address: u64, size: u64) -> Vec<u8> {
    let mut out = vec![3, 1];
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

pub fn layout_compact(data: &[u8]) -> Vec<u8> {
    let mut out = vec![3, 0];
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// `chunk_dims` includes the trailing element-size entry, as stored.
pub fn layout_chunked(btree_address: u64, chunk_dims: &[u32]) -> Vec<u8> {
    let mut out = vec![3, 2, chunk_dims.len() as u8];
    out.extend_from_slice(&btree_address.to_le_bytes());
    for d in chunk_dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    out
}

/// Version-1 layout message, contiguous class. Dimension sizes are in
/// elements and there is no byte-count field at this version.
pub fn layout_v1_contiguous(address: u64, dims: &[u32]) -> Vec<u8> {
    let mut out = vec![1, dims.len() as u8, 1, 0, 0, 0, 0, 0];
    out.extend_from_slice(&address.to_le_bytes());
    for d in dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    out
}

/// Version-1 layout message, chunked class. `chunk_dims` includes the
/// trailing element-size entry and the dimensionality field counts it.
pub fn layout_v1_chunked(btree_address: u64, chunk_dims: &[u32]) -> Vec<u8> {
    let mut out = vec![1, chunk_dims.len() as u8, 2, 0, 0, 0, 0, 0];
    out.extend_from_slice(&btree_address.to_le_bytes());
    for d in chunk_dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    out
}

pub fn fill_value_undefined() -> Vec<u8> {
    vec![2, 1, 1, 0]
}

pub fn fill_value_defined(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![2, 1, 1, 1];
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

pub fn pipeline_v1(filters: &[(u16, &[u32])]) -> Vec<u8> {
    let mut out = vec![1, filters.len() as u8, 0, 0, 0, 0, 0, 0];
    for (id, client_data) in filters {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // no name
        out.extend_from_slice(&1u16.to_le_bytes()); // optional
        out.extend_from_slice(&(client_data.len() as u16).to_le_bytes());
        for value in *client_data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        if client_data.len() % 2 == 1 {
            out.extend_from_slice(&[0; 4]);
        }
    }
    out
}

pub fn attribute_v1(name: &str, datatype: &[u8], dataspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = vec![1, 0];
    out.extend_from_slice(&((name.len() + 1) as u16).to_le_bytes());
    out.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
    out.extend_from_slice(&(dataspace.len() as u16).to_le_bytes());
    let start = out.len();
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.resize(start + pad8(name.len() + 1), 0);
    let start = out.len();
    out.extend_from_slice(datatype);
    out.resize(start + pad8(datatype.len()), 0);
    let start = out.len();
    out.extend_from_slice(dataspace);
    out.resize(start + pad8(dataspace.len()), 0);
    out.extend_from_slice(data);
    out
}

pub fn modification_time(seconds: u32) -> Vec<u8> {
    let mut out = vec![1, 0, 0, 0];
    out.extend_from_slice(&seconds.to_le_bytes());
    out
}

fn symbol_table_payload(btree_address: u64, heap_address: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&btree_address.to_le_bytes());
    out.extend_from_slice(&heap_address.to_le_bytes());
    out
}

pub fn link_message_hard(name: &str, address: u64) -> Vec<u8> {
    let mut out = vec![1, 0];
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&address.to_le_bytes());
    out
}

pub fn link_message_soft(name: &str, target: &str) -> Vec<u8> {
    let mut out = vec![1, 0x08, 1];
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&(target.len() as u16).to_le_bytes());
    out.extend_from_slice(target.as_bytes());
    out
}

/// Write an old-style group: local heap, `SNOD` leaf, B-tree root and a
/// v1 object header carrying the symbol table message. Children are
/// `(name, object header address)` pairs.
pub fn write_group(b: &mut FileBuilder, children: &[(&str, u64)]) -> u64 {
    write_group_with(b, children, &[])
}

/// `write_group` plus extra pre-framed messages on the group's header
/// (attributes, modification time).
pub fn write_group_with(
    b: &mut FileBuilder,
    children: &[(&str, u64)],
    extra_messages: &[Vec<u8>],
) -> u64 {
    let mut sorted: Vec<(&str, u64)> = children.to_vec();
    sorted.sort_by_key(|(name, _)| name.to_string());

    let mut segment = vec![0u8];
    let mut name_offsets = Vec::with_capacity(sorted.len());
    for (name, _) in &sorted {
        name_offsets.push(segment.len() as u64);
        segment.extend_from_slice(name.as_bytes());
        segment.push(0);
    }
    segment.resize(pad8(segment.len()), 0);
    let segment_size = segment.len() as u64;
    let segment_address = b.append(&segment);

    let mut heap = Vec::new();
    heap.extend_from_slice(b"HEAP");
    heap.extend_from_slice(&[0, 0, 0, 0]);
    heap.extend_from_slice(&segment_size.to_le_bytes());
    heap.extend_from_slice(&[0xFF; 8]); // no free list
    heap.extend_from_slice(&segment_address.to_le_bytes());
    let heap_address = b.append(&heap);

    let mut snod = Vec::new();
    snod.extend_from_slice(b"SNOD");
    snod.extend_from_slice(&[1, 0]);
    snod.extend_from_slice(&(sorted.len() as u16).to_le_bytes());
    for ((_, header_address), name_offset) in sorted.iter().zip(&name_offsets) {
        snod.extend_from_slice(&name_offset.to_le_bytes());
        snod.extend_from_slice(&header_address.to_le_bytes());
        snod.extend_from_slice(&[0; 24]); // cache type, reserved, scratch
    }
    let snod_address = b.append(&snod);

    let mut tree = Vec::new();
    tree.extend_from_slice(b"TREE");
    tree.extend_from_slice(&[0, 0]); // group node, leaf
    tree.extend_from_slice(&1u16.to_le_bytes());
    tree.extend_from_slice(&[0xFF; 16]); // no siblings
    tree.extend_from_slice(&0u64.to_le_bytes()); // key before first child
    tree.extend_from_slice(&snod_address.to_le_bytes());
    tree.extend_from_slice(
        &name_offsets
            .last()
            .copied()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let btree_address = b.append(&tree);

    let mut messages = vec![message(
        0x0011,
        &symbol_table_payload(btree_address, heap_address),
    )];
    messages.extend_from_slice(extra_messages);
    let header = object_header_v1(&messages);
    b.append(&header)
}

/// Write a new-style group: a version-2 object header whose children are
/// inline Link messages.
pub fn write_group_v2(b: &mut FileBuilder, children: &[(&str, u64)]) -> u64 {
    let messages: Vec<(u8, Vec<u8>)> = children
        .iter()
        .map(|(name, address)| (0x06, link_message_hard(name, *address)))
        .collect();
    b.append(&object_header_v2(&messages))
}

/// Write a contiguous dataset and return its object header address.
pub fn write_dataset(b: &mut FileBuilder, dims: &[u64], datatype: &[u8], data: &[u8]) -> u64 {
    write_dataset_with(b, dims, datatype, data, &[])
}

/// Contiguous dataset with extra pre-framed messages (attributes,
/// modification time, unknown types).
pub fn write_dataset_with(
    b: &mut FileBuilder,
    dims: &[u64],
    datatype: &[u8],
    data: &[u8],
    extra_messages: &[Vec<u8>],
) -> u64 {
    let data_address = b.append(data);
    let mut messages = vec![
        message(0x0001, &dataspace_v1(dims)),
        message(0x0003, datatype),
        message(0x0005, &fill_value_undefined()),
        message(
            0x0008,
            &layout_contiguous(data_address, data.len() as u64),
        ),
    ];
    messages.extend_from_slice(extra_messages);
    let header = object_header_v1(&messages);
    b.append(&header)
}

pub fn write_dataset_compact(
    b: &mut FileBuilder,
    dims: &[u64],
    datatype: &[u8],
    data: &[u8],
) -> u64 {
    let header = object_header_v1(&[
        message(0x0001, &dataspace_v1(dims)),
        message(0x0003, datatype),
        message(0x0005, &fill_value_undefined()),
        message(0x0008, &layout_compact(data)),
    ]);
    b.append(&header)
}

pub struct Chunk {
    /// Origin coordinates in element units, without the trailing
    /// element-size axis.
    pub origin: Vec<u64>,
    /// The chunk's bytes as stored (after any filters).
    pub stored: Vec<u8>,
    pub filter_mask: u32,
}

/// Write the chunk payloads and the type-1 B-tree leaf indexing them;
/// returns the B-tree address.
pub fn write_chunk_btree(b: &mut FileBuilder, dims: &[u64], chunks: &[Chunk]) -> u64 {
    let mut chunk_addresses = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        chunk_addresses.push(b.append(&chunk.stored));
    }

    let mut tree = Vec::new();
    tree.extend_from_slice(b"TREE");
    tree.extend_from_slice(&[1, 0]); // chunk node, leaf
    tree.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
    tree.extend_from_slice(&[0xFF; 16]); // no siblings
    for (chunk, address) in chunks.iter().zip(&chunk_addresses) {
        tree.extend_from_slice(&(chunk.stored.len() as u32).to_le_bytes());
        tree.extend_from_slice(&chunk.filter_mask.to_le_bytes());
        for origin in &chunk.origin {
            tree.extend_from_slice(&origin.to_le_bytes());
        }
        tree.extend_from_slice(&0u64.to_le_bytes()); // element-size axis
        tree.extend_from_slice(&address.to_le_bytes());
    }
    // Final key: one past the greatest chunk.
    tree.extend_from_slice(&0u32.to_le_bytes());
    tree.extend_from_slice(&0u32.to_le_bytes());
    for d in dims {
        tree.extend_from_slice(&d.to_le_bytes());
    }
    tree.extend_from_slice(&0u64.to_le_bytes());
    b.append(&tree)
}

/// Write a chunked dataset: chunk payloads, the type-1 B-tree leaf and
/// the object header. `chunk_dims` includes the trailing element size.
pub fn write_dataset_chunked(
    b: &mut FileBuilder,
    dims: &[u64],
    datatype: &[u8],
    chunk_dims: &[u32],
    chunks: &[Chunk],
    pipeline: Option<&[u8]>,
    fill: Option<&[u8]>,
) -> u64 {
    let btree_address = write_chunk_btree(b, dims, chunks);

    let mut messages = vec![
        message(0x0001, &dataspace_v1(dims)),
        message(0x0003, datatype),
    ];
    match fill {
        Some(bytes) => messages.push(message(0x0005, &fill_value_defined(bytes))),
        None => messages.push(message(0x0005, &fill_value_undefined())),
    }
    if let Some(payload) = pipeline {
        messages.push(message(0x000B, payload));
    }
    messages.push(message(0x0008, &layout_chunked(btree_address, chunk_dims)));
    let header = object_header_v1(&messages);
    b.append(&header)
}

/// Contiguous dataset carried by a version-1 layout message.
pub fn write_dataset_v1_layout(
    b: &mut FileBuilder,
    dims: &[u64],
    datatype: &[u8],
    data: &[u8],
) -> u64 {
    let data_address = b.append(data);
    let layout_dims: Vec<u32> = dims.iter().map(|d| *d as u32).collect();
    let header = object_header_v1(&[
        message(0x0001, &dataspace_v1(dims)),
        message(0x0003, datatype),
        message(0x0005, &fill_value_undefined()),
        message(0x0008, &layout_v1_contiguous(data_address, &layout_dims)),
    ]);
    b.append(&header)
}

/// Chunked dataset carried by a version-1 layout message.
pub fn write_dataset_chunked_v1(
    b: &mut FileBuilder,
    dims: &[u64],
    datatype: &[u8],
    chunk_dims: &[u32],
    chunks: &[Chunk],
) -> u64 {
    let btree_address = write_chunk_btree(b, dims, chunks);
    let header = object_header_v1(&[
        message(0x0001, &dataspace_v1(dims)),
        message(0x0003, datatype),
        message(0x0005, &fill_value_undefined()),
        message(0x0008, &layout_v1_chunked(btree_address, chunk_dims)),
    ]);
    b.append(&header)
}

/// Write a `GCOL` collection; objects get indexes 1, 2, … in order.
pub fn write_global_heap(b: &mut FileBuilder, objects: &[&[u8]]) -> u64 {
    let mut raw = Vec::new();
    raw.extend_from_slice(b"GCOL");
    raw.extend_from_slice(&[1, 0, 0, 0]);
    raw.extend_from_slice(&0u64.to_le_bytes()); // patched below
    for (i, object) in objects.iter().enumerate() {
        raw.extend_from_slice(&((i + 1) as u16).to_le_bytes());
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(&[0; 4]);
        raw.extend_from_slice(&(object.len() as u64).to_le_bytes());
        raw.extend_from_slice(object);
        raw.resize(pad8(raw.len()), 0);
    }
    let total = raw.len() as u64;
    raw[8..16].copy_from_slice(&total.to_le_bytes());
    b.append(&raw)
}

pub fn vlen_descriptor(count: u32, collection_address: u64, index: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&collection_address.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// The shuffle filter's forward transform (byte transposition).
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    let elements = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for element in 0..elements {
        for byte in 0..element_size {
            out[byte * elements + element] = data[element * element_size + byte];
        }
    }
    out[elements * element_size..].copy_from_slice(&data[elements * element_size..]);
    out
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect()
}

pub fn i64_bytes(values: &[i64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect()
}

pub fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect()
}
