//! Group resolution: turning an object header into a name → target map.
//!
//! Two encodings exist. Old-style groups carry a Symbol Table message
//! naming a v1 B-tree and a local heap; new-style groups carry Link
//! messages directly in the header (possibly in a continuation block).
//! Soft and external links are recorded but never followed implicitly.

use nom::bytes::streaming::take;
use nom::number::streaming::{le_u16, le_u8};

use crate::btree;
use crate::error::Error;
use crate::header::{Message, ObjectHeader};
use crate::heap::LocalHeap;
use crate::parse::{self, offset, Widths};
use crate::source::ByteSource;

#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
}

#[derive(Debug, Clone)]
pub enum LinkTarget {
    /// Address of the target's object header.
    Hard(u64),
    /// Path within this file, stored verbatim.
    Soft(String),
    /// File name and object path in another file.
    External { file: String, object_path: String },
}

/// The Link Info message. Only the fractal-heap hint matters to this
/// reader: a defined heap address with no inline Link messages means the
/// group uses dense storage, which is not implemented.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub max_creation_index: Option<u64>,
    pub fractal_heap_address: u64,
    pub name_index_btree_address: u64,
    pub creation_order_btree_address: Option<u64>,
}

impl LinkInfo {
    pub fn has_dense_storage(&self) -> bool {
        self.fractal_heap_address != parse::UNDEFINED_ADDRESS
    }
}

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub link_phase_change: Option<(u16, u16)>,
    pub estimated_sizes: Option<(u16, u16)>,
}

pub fn link_info(input: &[u8], w: Widths) -> parse::EResult<'_, LinkInfo> {
    let (input, version) = le_u8(input)?;
    if version != 0 {
        return Err(Error::Corrupt(format!("link info version {}", version)));
    }
    let (input, flags) = le_u8(input)?;
    let (input, max_creation_index) = if flags & 0x01 != 0 {
        let (input, raw) = take(8usize)(input)?;
        (input, Some(parse::le_uint(raw)))
    } else {
        (input, None)
    };
    let (input, fractal_heap_address) = offset(w.offset)(input)?;
    let (input, name_index_btree_address) = offset(w.offset)(input)?;
    let (input, creation_order_btree_address) = if flags & 0x02 != 0 {
        let (input, address) = offset(w.offset)(input)?;
        (input, Some(address))
    } else {
        (input, None)
    };
    Ok((
        input,
        LinkInfo {
            max_creation_index,
            fractal_heap_address,
            name_index_btree_address,
            creation_order_btree_address,
        },
    ))
}

pub fn group_info(input: &[u8]) -> parse::EResult<'_, GroupInfo> {
    let (input, version) = le_u8(input)?;
    if version != 0 {
        return Err(Error::Corrupt(format!("group info version {}", version)));
    }
    let (input, flags) = le_u8(input)?;
    let (input, link_phase_change) = if flags & 0x01 != 0 {
        let (input, max_compact) = le_u16(input)?;
        let (input, min_dense) = le_u16(input)?;
        (input, Some((max_compact, min_dense)))
    } else {
        (input, None)
    };
    let (input, estimated_sizes) = if flags & 0x02 != 0 {
        let (input, entries) = le_u16(input)?;
        let (input, name_length) = le_u16(input)?;
        (input, Some((entries, name_length)))
    } else {
        (input, None)
    };
    Ok((
        input,
        GroupInfo {
            link_phase_change,
            estimated_sizes,
        },
    ))
}

pub fn link_message(input: &[u8], w: Widths) -> parse::EResult<'_, Link> {
    let (input, version) = le_u8(input)?;
    if version != 1 {
        return Err(Error::Corrupt(format!("link message version {}", version)));
    }
    let (input, flags) = le_u8(input)?;
    let (input, link_type) = if flags & 0x08 != 0 {
        le_u8(input)?
    } else {
        (input, 0)
    };
    let input = if flags & 0x04 != 0 {
        take(8usize)(input)?.0 // creation order
    } else {
        input
    };
    let input = if flags & 0x10 != 0 {
        take(1usize)(input)?.0 // character set
    } else {
        input
    };
    let name_length_width = 1usize << (flags & 0x03);
    let (input, raw) = take(name_length_width)(input)?;
    let name_length = parse::le_uint(raw) as usize;
    let (input, name_bytes) = take(name_length)(input)?;
    let name = String::from_utf8_lossy(name_bytes).into_owned();
    let (input, target) = match link_type {
        0 => {
            let (input, address) = offset(w.offset)(input)?;
            (input, LinkTarget::Hard(address))
        }
        1 => {
            let (input, value_length) = le_u16(input)?;
            let (input, value) = take(value_length as usize)(input)?;
            (
                input,
                LinkTarget::Soft(parse::cstr(value)),
            )
        }
        64 => {
            let (input, value_length) = le_u16(input)?;
            let (input, value) = take(value_length as usize)(input)?;
            if value.is_empty() {
                return Err(Error::Corrupt("empty external link value".into()));
            }
            let body = &value[1..]; // version and flags nibble pair
            let file = parse::cstr(body);
            let object_path = match body.iter().position(|b| *b == 0) {
                Some(nul) => parse::cstr(&body[nul + 1..]),
                None => String::new(),
            };
            (input, LinkTarget::External { file, object_path })
        }
        t if t >= 65 => return Err(Error::UnsupportedFeature("user-defined link type")),
        t => return Err(Error::Corrupt(format!("reserved link type {}", t))),
    };
    Ok((input, Link { name, target }))
}

/// Enumerate an old-style group: walk the symbol-table B-tree and resolve
/// each entry's name through the local heap.
pub(crate) fn symbol_table_links(
    source: &ByteSource,
    w: Widths,
    btree_address: u64,
    heap: &LocalHeap,
) -> Result<Vec<Link>, Error> {
    let mut entries = Vec::new();
    let mut cursor = source.cursor(btree_address);
    btree::walk_group_btree(&mut cursor, w, btree_address, &mut entries)?;
    log::debug!(
        "symbol-table group at {:#x}: {} entries",
        btree_address,
        entries.len()
    );
    entries
        .into_iter()
        .map(|entry| {
            let name = heap.string_at(source, entry.link_name_offset)?;
            let target = match entry.scratch {
                btree::Scratch::SymbolicLink { link_value_offset } => {
                    LinkTarget::Soft(heap.string_at(source, u64::from(link_value_offset))?)
                }
                _ => LinkTarget::Hard(entry.object_header_address),
            };
            Ok(Link { name, target })
        })
        .collect()
}

/// Enumerate a new-style group from its Link messages. An advertised
/// fractal heap with no inline links means dense storage.
pub(crate) fn message_links(header: &ObjectHeader) -> Result<Vec<Link>, Error> {
    let links: Vec<Link> = header
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::Link(link) => Some(link.clone()),
            _ => None,
        })
        .collect();
    if links.is_empty() {
        if let Some(info) = header.link_info() {
            if info.has_dense_storage() {
                return Err(Error::UnsupportedFeature("dense link storage"));
            }
        }
    }
    Ok(links)
}
