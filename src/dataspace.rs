//! The dataspace message: rank and per-axis extents.

use nom::bytes::streaming::take;
use nom::multi::count;
use nom::number::streaming::le_u8;

use crate::error::Error;
use crate::parse::{self, offset};

/// Maximum-extent sentinel for an unlimited axis.
pub const UNLIMITED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Simple,
    Scalar,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataspace {
    pub kind: SpaceKind,
    pub dims: Vec<u64>,
    pub max_dims: Option<Vec<u64>>,
}

impl Dataspace {
    /// Total element count: the product of the current extents. A scalar
    /// space holds one element, a null space none.
    pub fn element_count(&self) -> u64 {
        match self.kind {
            SpaceKind::Null => 0,
            _ => self.dims.iter().product(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

pub fn dataspace(input: &[u8], length_size: u8) -> parse::EResult<'_, Dataspace> {
    let (input, version) = le_u8(input)?;
    match version {
        1 => {
            let (input, rank) = le_u8(input)?;
            let (input, flags) = le_u8(input)?;
            let (input, _) = take(5usize)(input)?;
            if flags & 0x02 != 0 {
                return Err(Error::UnsupportedFeature("dataspace permutation indices"));
            }
            let (input, dims) = count(offset(length_size), rank as usize)(input)?;
            let (input, max_dims) = if flags & 0x01 != 0 {
                let (input, max_dims) = count(offset(length_size), rank as usize)(input)?;
                (input, Some(max_dims))
            } else {
                (input, None)
            };
            let kind = if rank == 0 {
                SpaceKind::Scalar
            } else {
                SpaceKind::Simple
            };
            Ok((
                input,
                Dataspace {
                    kind,
                    dims,
                    max_dims,
                },
            ))
        }
        2 => {
            let (input, rank) = le_u8(input)?;
            let (input, flags) = le_u8(input)?;
            let (input, kind_raw) = le_u8(input)?;
            let kind = match kind_raw {
                0 => SpaceKind::Scalar,
                1 => SpaceKind::Simple,
                2 => SpaceKind::Null,
                k => return Err(Error::Corrupt(format!("dataspace type {}", k))),
            };
            let (input, dims) = count(offset(length_size), rank as usize)(input)?;
            let (input, max_dims) = if flags & 0x01 != 0 {
                let (input, max_dims) = count(offset(length_size), rank as usize)(input)?;
                (input, Some(max_dims))
            } else {
                (input, None)
            };
            Ok((
                input,
                Dataspace {
                    kind,
                    dims,
                    max_dims,
                },
            ))
        }
        v => Err(Error::Corrupt(format!("unknown dataspace version {}", v))),
    }
}
