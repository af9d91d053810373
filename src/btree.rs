//! Version-1 B-trees.
//!
//! Two node kinds share the `TREE` framing: type 0 nodes index a group's
//! children and lead to symbol-table (`SNOD`) leaves, type 1 nodes index
//! the chunks of a chunked dataset. Traversal collects every leaf entry;
//! range queries are a consumer concern.

use nom::bytes::streaming::{tag, take};
use nom::error::context;
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};

use crate::error::Error;
use crate::parse::{self, offset, Widths};
use crate::source::Cursor;

#[derive(Debug, Clone)]
pub struct SymbolTableEntry {
    pub link_name_offset: u64,
    pub object_header_address: u64,
    pub cache_type: u32,
    pub scratch: Scratch,
}

/// The cached part of a symbol-table entry. Interpretation depends on the
/// entry's cache type.
#[derive(Debug, Clone)]
pub enum Scratch {
    None,
    SymbolTable {
        btree_address: u64,
        local_heap_address: u64,
    },
    SymbolicLink {
        link_value_offset: u32,
    },
}

pub fn symbol_table_entry<'a>(
    offset_size: u8,
) -> impl Fn(&'a [u8]) -> parse::Result<'a, SymbolTableEntry> {
    move |input| {
        context("symbol table entry", |input| {
            let (input, link_name_offset) = offset(offset_size)(input)?;
            let (input, object_header_address) = offset(offset_size)(input)?;
            let (input, cache_type) = le_u32(input)?;
            let (input, _) = take(4usize)(input)?;
            let (input, scratch_bytes) = take(16usize)(input)?;
            let scratch = match cache_type {
                1 => {
                    let (rest, btree_address) = offset(offset_size)(scratch_bytes)?;
                    let (_, local_heap_address) = offset(offset_size)(rest)?;
                    Scratch::SymbolTable {
                        btree_address,
                        local_heap_address,
                    }
                }
                2 => Scratch::SymbolicLink {
                    link_value_offset: u32::from_le_bytes([
                        scratch_bytes[0],
                        scratch_bytes[1],
                        scratch_bytes[2],
                        scratch_bytes[3],
                    ]),
                },
                _ => Scratch::None,
            };
            Ok((
                input,
                SymbolTableEntry {
                    link_name_offset,
                    object_header_address,
                    cache_type,
                    scratch,
                },
            ))
        })(input)
    }
}

#[derive(Debug)]
pub struct SymbolTableNode {
    pub version: u8,
    pub entries: Vec<SymbolTableEntry>,
}

pub fn symbol_table_node<'a>(
    offset_size: u8,
) -> impl Fn(&'a [u8]) -> parse::Result<'a, SymbolTableNode> {
    move |input| {
        context("symbol table node", |input| {
            let (input, _) = tag(b"SNOD")(input)?;
            let (input, version) = le_u8(input)?;
            let (input, _) = take(1usize)(input)?;
            let (input, number_of_symbols) = le_u16(input)?;
            let (input, entries) = count(
                symbol_table_entry(offset_size),
                number_of_symbols as usize,
            )(input)?;
            Ok((input, SymbolTableNode { version, entries }))
        })(input)
    }
}

/// A type-0 node: `entries_used` children bracketed by `entries_used + 1`
/// local-heap name offsets.
#[derive(Debug)]
pub struct GroupNode {
    pub level: u8,
    pub left_sibling: u64,
    pub right_sibling: u64,
    pub keys: Vec<u64>,
    pub children: Vec<u64>,
}

pub fn group_node<'a>(w: Widths) -> impl Fn(&'a [u8]) -> parse::Result<'a, GroupNode> {
    move |input| {
        context("group b-tree node", |input| {
            let (input, _) = tag(b"TREE")(input)?;
            let (input, _) = tag([0u8])(input)?;
            let (input, level) = le_u8(input)?;
            let (input, entries_used) = le_u16(input)?;
            let (input, left_sibling) = offset(w.offset)(input)?;
            let (input, right_sibling) = offset(w.offset)(input)?;
            let mut keys = Vec::with_capacity(entries_used as usize + 1);
            let mut children = Vec::with_capacity(entries_used as usize);
            let mut rest = input;
            for _ in 0..entries_used {
                let (r, key) = offset(w.length)(rest)?;
                let (r, child) = offset(w.offset)(r)?;
                keys.push(key);
                children.push(child);
                rest = r;
            }
            let (rest, final_key) = offset(w.length)(rest)?;
            keys.push(final_key);
            Ok((
                rest,
                GroupNode {
                    level,
                    left_sibling,
                    right_sibling,
                    keys,
                    children,
                },
            ))
        })(input)
    }
}

/// A chunk key: origin coordinates in element units (one per dataspace
/// axis plus the trailing element-size axis) and the chunk's stored size.
#[derive(Debug, Clone)]
pub struct ChunkKey {
    pub chunk_size: u32,
    pub filter_mask: u32,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub key: ChunkKey,
    pub address: u64,
}

#[derive(Debug)]
pub struct ChunkNode {
    pub level: u8,
    pub entries: Vec<ChunkEntry>,
}

fn chunk_key<'a>(key_dims: usize) -> impl Fn(&'a [u8]) -> parse::Result<'a, ChunkKey> {
    move |input| {
        let (input, chunk_size) = le_u32(input)?;
        let (input, filter_mask) = le_u32(input)?;
        let (input, offsets) = count(le_u64, key_dims)(input)?;
        Ok((
            input,
            ChunkKey {
                chunk_size,
                filter_mask,
                offsets,
            },
        ))
    }
}

/// `key_dims` is the dataspace rank plus one; key offsets are always
/// 8 bytes regardless of the superblock widths.
pub fn chunk_node<'a>(
    offset_size: u8,
    key_dims: usize,
) -> impl Fn(&'a [u8]) -> parse::Result<'a, ChunkNode> {
    move |input| {
        context("chunk b-tree node", |input| {
            let (input, _) = tag(b"TREE")(input)?;
            let (input, _) = tag([1u8])(input)?;
            let (input, level) = le_u8(input)?;
            let (input, entries_used) = le_u16(input)?;
            let (input, _left) = offset(offset_size)(input)?;
            let (input, _right) = offset(offset_size)(input)?;
            let mut entries = Vec::with_capacity(entries_used as usize);
            let mut rest = input;
            for _ in 0..entries_used {
                let (r, key) = chunk_key(key_dims)(rest)?;
                let (r, address) = offset(offset_size)(r)?;
                entries.push(ChunkEntry { key, address });
                rest = r;
            }
            Ok((rest, ChunkNode { level, entries }))
        })(input)
    }
}

/// Collect every symbol-table entry reachable from the group B-tree rooted
/// at `address`, in key order.
pub fn walk_group_btree(
    cursor: &mut Cursor<'_>,
    w: Widths,
    address: u64,
    entries: &mut Vec<SymbolTableEntry>,
) -> Result<(), Error> {
    cursor.seek(address);
    let node = cursor.parse(group_node(w))?;
    let level = node.level;
    log::trace!(
        "group b-tree node at {:#x}: level {}, {} children",
        address,
        level,
        node.children.len()
    );
    for child in node.children {
        cursor.with_saved_position(|c| {
            if level == 0 {
                c.seek(child);
                let node = c.parse(symbol_table_node(w.offset))?;
                entries.extend(node.entries);
                Ok(())
            } else {
                walk_group_btree(c, w, child, entries)
            }
        })?;
    }
    Ok(())
}

/// Collect every stored chunk reachable from the chunk B-tree rooted at
/// `address`.
pub fn walk_chunk_btree(
    cursor: &mut Cursor<'_>,
    offset_size: u8,
    key_dims: usize,
    address: u64,
    out: &mut Vec<ChunkEntry>,
) -> Result<(), Error> {
    cursor.seek(address);
    let node = cursor.parse(chunk_node(offset_size, key_dims))?;
    let level = node.level;
    for entry in node.entries {
        if level == 0 {
            out.push(entry);
        } else {
            cursor.with_saved_position(|c| {
                walk_chunk_btree(c, offset_size, key_dims, entry.address, out)
            })?;
        }
    }
    Ok(())
}
