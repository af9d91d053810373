//! The datatype message: a recursive description of per-element encoding.
//!
//! The first byte splits into class (low nibble) and version (high
//! nibble), the next three carry class-specific bit fields, the next four
//! the byte size. Class-specific property fields follow, including nested
//! datatypes for compound, enum, vlen and array classes.

use nom::bytes::streaming::take;
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u24, le_u32, le_u8};

use crate::error::Error;
use crate::parse::{self, name_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Object,
    Region,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VlenKind {
    Sequence,
    String {
        padding: StringPadding,
        character_set: CharacterSet,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    pub byte_offset: u64,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        byte_order: ByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    Time {
        size: u32,
        byte_order: ByteOrder,
        bit_precision: u16,
    },
    String {
        size: u32,
        padding: StringPadding,
        character_set: CharacterSet,
    },
    Bitfield {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
    },
    Opaque {
        size: u32,
        tag: String,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Reference {
        size: u32,
        kind: ReferenceKind,
    },
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    VariableLength {
        size: u32,
        kind: VlenKind,
        base: Box<Datatype>,
    },
    Array {
        size: u32,
        dims: Vec<u32>,
        base: Box<Datatype>,
    },
}

impl Datatype {
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::Bitfield { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }

    /// h5py encodes booleans as 1-byte integers with a 1-bit precision.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Datatype::FixedPoint {
                size: 1,
                bit_precision: 1,
                ..
            }
        )
    }

    /// Compact human-readable rendering, used by `inspect`.
    pub fn description(&self) -> String {
        match self {
            _ if self.is_boolean() => "Bool".to_string(),
            Datatype::FixedPoint {
                size, signed: true, ..
            } => format!("Int{}", size * 8),
            Datatype::FixedPoint { size, .. } => format!("UInt{}", size * 8),
            Datatype::FloatingPoint { size, .. } => format!("Float{}", size * 8),
            Datatype::Time { size, .. } => format!("Time{}", size * 8),
            Datatype::String { size, .. } => format!("String({})", size),
            Datatype::Bitfield { size, .. } => format!("Bitfield{}", size * 8),
            Datatype::Opaque { tag, .. } => format!("Opaque({})", tag),
            Datatype::Compound { members, .. } => {
                let fields: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                format!("Compound{{{}}}", fields.join(", "))
            }
            Datatype::Reference { .. } => "Reference".to_string(),
            Datatype::Enumeration { base, .. } => format!("Enum<{}>", base.description()),
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => "VlenString".to_string(),
            Datatype::VariableLength { base, .. } => format!("Vlen<{}>", base.description()),
            Datatype::Array { dims, base, .. } => {
                format!("Array{:?}<{}>", dims, base.description())
            }
        }
    }
}

/// Decode a fixed-point value honoring byte order, bit offset and
/// precision. Also used to materialize enum member values at parse time.
pub(crate) fn decode_fixed_point(
    window: &[u8],
    byte_order: ByteOrder,
    signed: bool,
    bit_offset: u16,
    bit_precision: u16,
) -> i64 {
    let raw = match byte_order {
        ByteOrder::Little => parse::le_uint(window),
        ByteOrder::Big => parse::be_uint(window),
    };
    let precision = if bit_precision == 0 {
        (window.len() as u16).saturating_mul(8)
    } else {
        bit_precision
    };
    if bit_offset >= 64 {
        return 0;
    }
    let mut value = raw >> bit_offset;
    if precision < 64 {
        value &= (1u64 << precision) - 1;
        if signed && precision > 0 && (value >> (precision - 1)) & 1 == 1 {
            value |= !0u64 << precision;
        }
    }
    value as i64
}

fn byte_order(bits: u32) -> ByteOrder {
    if bits & 1 == 0 {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    }
}

fn string_padding(raw: u32) -> Result<StringPadding, Error> {
    match raw {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        p => Err(Error::Corrupt(format!("string padding type {}", p))),
    }
}

fn character_set(raw: u32) -> Result<CharacterSet, Error> {
    match raw {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        c => Err(Error::Corrupt(format!("character set {}", c))),
    }
}

/// Width of a version-3 compound member offset: the minimal byte count
/// covering the enclosing datatype's size.
fn compound_offset_width(size: u32) -> u8 {
    match size {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

pub fn datatype(input: &[u8]) -> parse::EResult<'_, Datatype> {
    let (input, class_and_version) = le_u8(input)?;
    let version = class_and_version >> 4;
    let class = class_and_version & 0x0F;
    if version == 0 || version > 3 {
        return Err(Error::UnsupportedDatatypeVersion(version));
    }
    let (input, bits) = le_u24(input)?;
    let (input, size) = le_u32(input)?;
    match class {
        0 => {
            let (input, bit_offset) = le_u16(input)?;
            let (input, bit_precision) = le_u16(input)?;
            Ok((
                input,
                Datatype::FixedPoint {
                    size,
                    byte_order: byte_order(bits),
                    signed: bits & 0x08 != 0,
                    bit_offset,
                    bit_precision,
                },
            ))
        }
        1 => {
            let byte_order = match (bits & 1, (bits >> 6) & 1) {
                (0, 0) => ByteOrder::Little,
                (1, 0) => ByteOrder::Big,
                _ => return Err(Error::UnsupportedFeature("VAX byte order")),
            };
            let sign_location = ((bits >> 8) & 0xFF) as u8;
            let (input, bit_offset) = le_u16(input)?;
            let (input, bit_precision) = le_u16(input)?;
            let (input, exponent_location) = le_u8(input)?;
            let (input, exponent_size) = le_u8(input)?;
            let (input, mantissa_location) = le_u8(input)?;
            let (input, mantissa_size) = le_u8(input)?;
            let (input, exponent_bias) = le_u32(input)?;
            Ok((
                input,
                Datatype::FloatingPoint {
                    size,
                    byte_order,
                    sign_location,
                    bit_offset,
                    bit_precision,
                    exponent_location,
                    exponent_size,
                    mantissa_location,
                    mantissa_size,
                    exponent_bias,
                },
            ))
        }
        2 => {
            let (input, bit_precision) = le_u16(input)?;
            Ok((
                input,
                Datatype::Time {
                    size,
                    byte_order: byte_order(bits),
                    bit_precision,
                },
            ))
        }
        3 => Ok((
            input,
            Datatype::String {
                size,
                padding: string_padding(bits & 0x0F)?,
                character_set: character_set((bits >> 4) & 0x0F)?,
            },
        )),
        4 => {
            let (input, bit_offset) = le_u16(input)?;
            let (input, bit_precision) = le_u16(input)?;
            Ok((
                input,
                Datatype::Bitfield {
                    size,
                    byte_order: byte_order(bits),
                    bit_offset,
                    bit_precision,
                },
            ))
        }
        5 => {
            let tag_len = (bits & 0xFF) as usize;
            let (input, tag_bytes) = take(tag_len)(input)?;
            Ok((
                input,
                Datatype::Opaque {
                    size,
                    tag: parse::cstr(tag_bytes),
                },
            ))
        }
        6 => compound(input, version, size, (bits & 0xFFFF) as usize),
        7 => {
            let kind = match bits & 0x0F {
                0 => ReferenceKind::Object,
                1 => ReferenceKind::Region,
                k => return Err(Error::Corrupt(format!("reference subtype {}", k))),
            };
            Ok((input, Datatype::Reference { size, kind }))
        }
        8 => enumeration(input, version, size, (bits & 0xFFFF) as usize),
        9 => {
            let kind = match bits & 0x0F {
                0 => VlenKind::Sequence,
                1 => VlenKind::String {
                    padding: string_padding((bits >> 4) & 0x0F)?,
                    character_set: character_set((bits >> 8) & 0x0F)?,
                },
                k => return Err(Error::Corrupt(format!("vlen subtype {}", k))),
            };
            let (input, base) = datatype(input)?;
            Ok((
                input,
                Datatype::VariableLength {
                    size,
                    kind,
                    base: Box::new(base),
                },
            ))
        }
        10 => {
            let (input, dimensionality) = le_u8(input)?;
            let input = if version <= 2 {
                take(3usize)(input)?.0
            } else {
                input
            };
            let (input, dims) = count(le_u32, dimensionality as usize)(input)?;
            // Versions 1 and 2 carried a permutation index per dimension.
            let input = if version <= 2 {
                take(4 * dimensionality as usize)(input)?.0
            } else {
                input
            };
            let (input, base) = datatype(input)?;
            Ok((
                input,
                Datatype::Array {
                    size,
                    dims,
                    base: Box::new(base),
                },
            ))
        }
        c => Err(Error::Corrupt(format!("invalid datatype class {}", c))),
    }
}

fn compound(
    mut input: &[u8],
    version: u8,
    size: u32,
    member_count: usize,
) -> parse::EResult<'_, Datatype> {
    let mut members = Vec::with_capacity(member_count);
    for _ in 0..member_count {
        let (rest, name) = name_string(input, version < 3)?;
        let (rest, byte_offset, legacy_dims) = match version {
            1 => {
                let (rest, byte_offset) = le_u32(rest)?;
                let (rest, dimensionality) = le_u8(rest)?;
                let (rest, _) = take(3usize)(rest)?;
                let (rest, _permutation) = le_u32(rest)?;
                let (rest, _) = take(4usize)(rest)?;
                let (rest, dims) = count(le_u32, 4usize)(rest)?;
                let used = (dimensionality as usize).min(dims.len());
                (rest, u64::from(byte_offset), dims[..used].to_vec())
            }
            2 => {
                let (rest, byte_offset) = le_u32(rest)?;
                (rest, u64::from(byte_offset), Vec::new())
            }
            _ => {
                let width = compound_offset_width(size);
                let (rest, raw) = take(width)(rest)?;
                (rest, parse::le_uint(raw), Vec::new())
            }
        };
        let (rest, base) = datatype(rest)?;
        let member_type = if legacy_dims.is_empty() {
            base
        } else {
            let elements: u32 = legacy_dims.iter().product();
            Datatype::Array {
                size: base.size() * elements,
                dims: legacy_dims,
                base: Box::new(base),
            }
        };
        members.push(CompoundMember {
            name,
            byte_offset,
            datatype: member_type,
        });
        input = rest;
    }
    Ok((input, Datatype::Compound { size, members }))
}

fn enumeration(
    input: &[u8],
    version: u8,
    size: u32,
    member_count: usize,
) -> parse::EResult<'_, Datatype> {
    let (input, base) = datatype(input)?;
    let (byte_order, signed, bit_offset, bit_precision) = match &base {
        Datatype::FixedPoint {
            byte_order,
            signed,
            bit_offset,
            bit_precision,
            ..
        } => (*byte_order, *signed, *bit_offset, *bit_precision),
        _ => {
            return Err(Error::Corrupt(
                "enumeration base is not a fixed-point type".into(),
            ))
        }
    };
    let mut names = Vec::with_capacity(member_count);
    let mut rest = input;
    for _ in 0..member_count {
        let (r, name) = name_string(rest, version < 3)?;
        names.push(name);
        rest = r;
    }
    let value_size = base.size() as usize;
    let mut members = Vec::with_capacity(member_count);
    for name in names {
        let (r, window) = take(value_size)(rest)?;
        members.push(EnumMember {
            name,
            value: decode_fixed_point(window, byte_order, signed, bit_offset, bit_precision),
        });
        rest = r;
    }
    Ok((
        rest,
        Datatype::Enumeration {
            size,
            base: Box::new(base),
            members,
        },
    ))
}
