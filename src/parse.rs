//! Shared nom plumbing for the on-disk structures.
//!
//! Fixed-layout structures are parsed by pure functions over byte slices.
//! Two result aliases exist: [`Result`] for parsers whose only failure
//! modes are framing errors (nom's), and [`EResult`] for decoders that can
//! also fail with a typed [`Error`](crate::Error) such as an unsupported
//! version. nom errors convert into `Error` at the boundary, so `?` mixes
//! both freely inside an `EResult` parser.

use nom::bytes::streaming::take;

pub type Result<'a, O> =
    std::result::Result<(&'a [u8], O), nom::Err<nom::error::VerboseError<&'a [u8]>>>;

pub type EResult<'a, O> = std::result::Result<(&'a [u8], O), crate::error::Error>;

/// The normalized "undefined address" sentinel. On disk it is the all-ones
/// value at the superblock's offset width; parsers widen it to this.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// The offset and length field widths fixed by the superblock. 4 or 8,
/// constant for the lifetime of a file.
#[derive(Debug, Clone, Copy)]
pub struct Widths {
    pub offset: u8,
    pub length: u8,
}

/// Parse a file offset or length of the width declared by the superblock
/// (4 or 8 bytes in practice). All-ones values normalize to
/// [`UNDEFINED_ADDRESS`] regardless of width.
pub fn offset<'a>(width: u8) -> impl Fn(&'a [u8]) -> Result<'a, u64> {
    move |input| {
        let (input, bytes) = take(width)(input)?;
        if bytes.iter().all(|b| *b == 0xFF) {
            return Ok((input, UNDEFINED_ADDRESS));
        }
        Ok((input, le_uint(bytes)))
    }
}

/// Little-endian unsigned integer of up to 8 bytes.
pub fn le_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Big-endian unsigned integer of up to 8 bytes.
pub fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Round `n` up to the next multiple of 8.
pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// The bytes of `input` up to the first NUL, decoded as UTF-8.
pub fn cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Consume a NUL-terminated string. When `padded` the field occupies a
/// multiple of 8 bytes including the terminator (datatype versions 1 and
/// 2 pad member and enum names this way; version 3 does not).
pub fn name_string(input: &[u8], padded: bool) -> Result<'_, String> {
    let nul = match input.iter().position(|b| *b == 0) {
        Some(p) => p,
        None => return Err(nom::Err::Incomplete(nom::Needed::Unknown)),
    };
    let name = String::from_utf8_lossy(&input[..nul]).into_owned();
    let consumed = if padded { pad8(nul + 1) } else { nul + 1 };
    let (input, _) = take(consumed)(input)?;
    Ok((input, name))
}

fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Jenkins lookup3 (`hashlittle`), the checksum applied to version-2
/// metadata blocks (superblock v2/v3, OHDR, OCHK).
pub fn lookup3(data: &[u8], init: u32) -> u32 {
    let mut a = 0xdead_beef_u32
        .wrapping_add(data.len() as u32)
        .wrapping_add(init);
    let mut b = a;
    let mut c = a;
    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        a = a.wrapping_sub(c);
        a ^= c.rotate_left(4);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a);
        b ^= a.rotate_left(6);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b);
        c ^= b.rotate_left(8);
        b = b.wrapping_add(a);
        a = a.wrapping_sub(c);
        a ^= c.rotate_left(16);
        c = c.wrapping_add(b);
        b = b.wrapping_sub(a);
        b ^= a.rotate_left(19);
        a = a.wrapping_add(c);
        c = c.wrapping_sub(b);
        c ^= b.rotate_left(4);
        b = b.wrapping_add(a);
        rest = &rest[12..];
    }
    if rest.is_empty() {
        return c;
    }
    // Zero-padding the tail is equivalent to the masked partial-word adds
    // of the reference implementation.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(word(&tail[0..4]));
    b = b.wrapping_add(word(&tail[4..8]));
    c = c.wrapping_add(word(&tail[8..12]));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}
