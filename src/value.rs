//! The element decoder: raw bytes to typed values.
//!
//! Decoding dispatches on the datatype class over one element's byte
//! window. Variable-length elements jump to a global-heap collection;
//! collections are parsed once and cached per file, since one dataset can
//! reference the same collection thousands of times.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::datatype::{
    decode_fixed_point, ByteOrder, Datatype, ReferenceKind, StringPadding, VlenKind,
};
use crate::error::Error;
use crate::heap::GlobalHeap;
use crate::parse::{self, Widths};
use crate::source::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

/// A decoded element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Boolean(bool),
    String(String),
    Bitfield(Vec<u8>),
    Opaque { tag: String, data: Vec<u8> },
    Compound(Vec<(String, Value)>),
    Array(Vec<Value>),
    Enum { name: Option<String>, value: i64 },
    Reference(u64),
    Vlen(Vec<Value>),
    Time(i64),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) if *v <= i64::max_value() as u64 => Some(*v as i64),
            Value::Enum { value, .. } => Some(*value),
            Value::Time(v) => Some(*v),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Everything the decoder needs to resolve vlen references.
pub(crate) struct DecodeContext<'f> {
    pub source: &'f ByteSource,
    pub widths: Widths,
    pub global_heaps: &'f RefCell<HashMap<u64, Rc<GlobalHeap>>>,
}

impl<'f> DecodeContext<'f> {
    fn global_heap(&self, address: u64) -> Result<Rc<GlobalHeap>, Error> {
        if let Some(heap) = self.global_heaps.borrow().get(&address) {
            return Ok(Rc::clone(heap));
        }
        let heap = Rc::new(GlobalHeap::read(self.source, self.widths.length, address)?);
        self.global_heaps
            .borrow_mut()
            .insert(address, Rc::clone(&heap));
        Ok(heap)
    }
}

/// Decode `count` elements from a row-major byte image.
pub(crate) fn decode_elements(
    ctx: &DecodeContext<'_>,
    bytes: &[u8],
    dtype: &Datatype,
    count: usize,
) -> Result<Vec<Value>, Error> {
    let size = dtype.size() as usize;
    if bytes.len() < count * size {
        return Err(Error::Corrupt(format!(
            "element image holds {} bytes, {} elements of {} bytes requested",
            bytes.len(),
            count,
            size
        )));
    }
    (0..count)
        .map(|i| decode_element(ctx, &bytes[i * size..(i + 1) * size], dtype))
        .collect()
}

fn raw_uint(window: &[u8], order: ByteOrder) -> u64 {
    match order {
        ByteOrder::Little => parse::le_uint(window),
        ByteOrder::Big => parse::be_uint(window),
    }
}

fn bit_mask(bits: u8) -> u64 {
    if bits >= 64 {
        !0
    } else {
        (1u64 << bits) - 1
    }
}

fn shifted(raw: u64, bits: u8) -> u64 {
    if bits >= 64 {
        0
    } else {
        raw >> bits
    }
}

fn decode_element(
    ctx: &DecodeContext<'_>,
    window: &[u8],
    dtype: &Datatype,
) -> Result<Value, Error> {
    match dtype {
        Datatype::FixedPoint {
            byte_order,
            signed,
            bit_offset,
            bit_precision,
            ..
        } => {
            if dtype.is_boolean() {
                let value =
                    decode_fixed_point(window, *byte_order, false, *bit_offset, *bit_precision);
                return Ok(Value::Boolean(value != 0));
            }
            let value = decode_fixed_point(window, *byte_order, *signed, *bit_offset, *bit_precision);
            if *signed {
                Ok(Value::Int(value))
            } else {
                Ok(Value::Uint(value as u64))
            }
        }
        Datatype::FloatingPoint {
            size,
            byte_order,
            sign_location,
            exponent_location,
            exponent_size,
            mantissa_location,
            mantissa_size,
            exponent_bias,
            ..
        } => {
            let raw = raw_uint(window, *byte_order);
            // IEEE single and double take the hardware path.
            let value = if *size == 4 && *exponent_size == 8 && *mantissa_size == 23 {
                f64::from(f32::from_bits(raw as u32))
            } else if *size == 8 && *exponent_size == 11 && *mantissa_size == 52 {
                f64::from_bits(raw)
            } else {
                generic_float(
                    raw,
                    *sign_location,
                    *exponent_location,
                    *exponent_size,
                    *mantissa_location,
                    *mantissa_size,
                    *exponent_bias,
                )
            };
            Ok(Value::Float(value))
        }
        Datatype::Time { byte_order, .. } => {
            Ok(Value::Time(raw_uint(window, *byte_order) as i64))
        }
        Datatype::String {
            padding, ..
        } => {
            let text = match padding {
                StringPadding::NullTerminate => parse::cstr(window),
                StringPadding::NullPad => {
                    let end = window
                        .iter()
                        .rposition(|b| *b != 0)
                        .map(|p| p + 1)
                        .unwrap_or(0);
                    String::from_utf8_lossy(&window[..end]).into_owned()
                }
                StringPadding::SpacePad => {
                    let end = window
                        .iter()
                        .rposition(|b| *b != b' ')
                        .map(|p| p + 1)
                        .unwrap_or(0);
                    String::from_utf8_lossy(&window[..end]).into_owned()
                }
            };
            Ok(Value::String(text))
        }
        Datatype::Bitfield { .. } => Ok(Value::Bitfield(window.to_vec())),
        Datatype::Opaque { tag, .. } => Ok(Value::Opaque {
            tag: tag.clone(),
            data: window.to_vec(),
        }),
        Datatype::Compound { members, .. } => {
            let mut fields = Vec::with_capacity(members.len());
            for member in members {
                let start = member.byte_offset as usize;
                let len = member.datatype.size() as usize;
                if start + len > window.len() {
                    return Err(Error::Corrupt(format!(
                        "compound member {} extends past its element",
                        member.name
                    )));
                }
                let value = decode_element(ctx, &window[start..start + len], &member.datatype)?;
                fields.push((member.name.clone(), value));
            }
            Ok(Value::Compound(fields))
        }
        Datatype::Reference { kind, .. } => match kind {
            ReferenceKind::Object => {
                let len = window.len().min(8);
                Ok(Value::Reference(parse::le_uint(&window[..len])))
            }
            ReferenceKind::Region => {
                Err(Error::UnsupportedFeature("region reference dereference"))
            }
        },
        Datatype::Enumeration { base, members, .. } => {
            let value = match decode_element(ctx, window, base)? {
                Value::Int(v) => v,
                Value::Uint(v) => v as i64,
                Value::Boolean(b) => i64::from(b),
                other => {
                    return Err(Error::Corrupt(format!(
                        "enumeration base decoded to {:?}",
                        other
                    )))
                }
            };
            let name = members
                .iter()
                .find(|m| m.value == value)
                .map(|m| m.name.clone());
            Ok(Value::Enum { name, value })
        }
        Datatype::VariableLength { kind, base, .. } => decode_vlen(ctx, window, kind, base),
        Datatype::Array { dims, base, .. } => {
            let elements = dims.iter().map(|d| u64::from(*d)).product::<u64>() as usize;
            let size = base.size() as usize;
            if elements * size > window.len() {
                return Err(Error::Corrupt(
                    "array datatype larger than its element".into(),
                ));
            }
            let mut values = Vec::with_capacity(elements);
            for i in 0..elements {
                values.push(decode_element(ctx, &window[i * size..(i + 1) * size], base)?);
            }
            Ok(Value::Array(values))
        }
    }
}

/// A vlen element is a 16-byte descriptor: element count, global-heap
/// collection address, object index. The jump to the collection must not
/// disturb the caller's cursor; the collection cache makes it a lookup.
fn decode_vlen(
    ctx: &DecodeContext<'_>,
    window: &[u8],
    kind: &VlenKind,
    base: &Datatype,
) -> Result<Value, Error> {
    if window.len() < 16 {
        return Err(Error::Corrupt("vlen descriptor shorter than 16 bytes".into()));
    }
    let count = u32::from_le_bytes([window[0], window[1], window[2], window[3]]) as usize;
    let address = parse::le_uint(&window[4..12]);
    let index = u32::from_le_bytes([window[12], window[13], window[14], window[15]]);
    if index > u32::from(u16::max_value()) {
        return Err(Error::Corrupt(format!("global heap object index {}", index)));
    }
    let heap = ctx.global_heap(address)?;
    let bytes = heap.object(index as u16)?;
    match kind {
        VlenKind::String { .. } => Ok(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        VlenKind::Sequence => {
            // Sequences of bytes read as strings, matching how h5py
            // round-trips them.
            if matches!(
                base,
                Datatype::FixedPoint {
                    size: 1,
                    signed: false,
                    ..
                }
            ) && !base.is_boolean()
            {
                return Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()));
            }
            let size = base.size() as usize;
            if bytes.len() < count * size {
                return Err(Error::Corrupt(format!(
                    "vlen object holds {} bytes, {} elements of {} bytes expected",
                    bytes.len(),
                    count,
                    size
                )));
            }
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(decode_element(ctx, &bytes[i * size..(i + 1) * size], base)?);
            }
            Ok(Value::Vlen(values))
        }
    }
}

fn generic_float(
    raw: u64,
    sign_location: u8,
    exponent_location: u8,
    exponent_size: u8,
    mantissa_location: u8,
    mantissa_size: u8,
    exponent_bias: u32,
) -> f64 {
    let sign = shifted(raw, sign_location) & 1;
    let exponent = shifted(raw, exponent_location) & bit_mask(exponent_size);
    let mantissa = shifted(raw, mantissa_location) & bit_mask(mantissa_size);
    let magnitude = if exponent == bit_mask(exponent_size) {
        if mantissa == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else if exponent == 0 {
        mantissa as f64 * exp2(1 - i64::from(exponent_bias) - i64::from(mantissa_size))
    } else {
        (1.0 + mantissa as f64 / exp2(i64::from(mantissa_size)))
            * exp2(exponent as i64 - i64::from(exponent_bias))
    };
    if sign == 1 {
        -magnitude
    } else {
        magnitude
    }
}

fn exp2(power: i64) -> f64 {
    2f64.powi(power as i32)
}

/// Milliseconds dominate past this magnitude; epoch seconds never reach
/// it in practice.
const MILLISECOND_THRESHOLD: i64 = 1_000_000_000_000;

pub(crate) fn to_bool(value: &Value) -> Result<bool, Error> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Int(v) => Ok(*v != 0),
        Value::Uint(v) => Ok(*v != 0),
        Value::Enum { value, .. } => Ok(*value != 0),
        other => Err(Error::TypeMismatch(format!(
            "cannot read {:?} as boolean",
            other
        ))),
    }
}

pub(crate) fn to_timestamp(value: &Value) -> Result<i64, Error> {
    match value {
        Value::Time(v) | Value::Int(v) => Ok(*v),
        Value::Uint(v) if *v <= i64::max_value() as u64 => Ok(*v as i64),
        other => Err(Error::TypeMismatch(format!(
            "cannot read {:?} as a timestamp",
            other
        ))),
    }
}

/// Pick a unit for raw timestamps: magnitudes past 10^12 only occur for
/// milliseconds.
pub(crate) fn detect_unit(timestamps: &[i64]) -> TimeUnit {
    if timestamps
        .iter()
        .any(|t| t.abs() > MILLISECOND_THRESHOLD)
    {
        TimeUnit::Milliseconds
    } else {
        TimeUnit::Seconds
    }
}

pub(crate) fn to_datetime(timestamp: i64, unit: TimeUnit) -> Result<DateTime<Utc>, Error> {
    let (seconds, nanos) = match unit {
        TimeUnit::Seconds => (timestamp, 0u32),
        TimeUnit::Milliseconds => (
            timestamp.div_euclid(1000),
            (timestamp.rem_euclid(1000) * 1_000_000) as u32,
        ),
    };
    DateTime::<Utc>::from_timestamp(seconds, nanos)
        .ok_or_else(|| Error::Corrupt(format!("timestamp {} out of range", timestamp)))
}
