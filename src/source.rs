//! Random-access byte source over a memory-mapped file or an owned buffer.
//!
//! Nothing else in the crate touches the file directly: every structure is
//! parsed from slices handed out here, and every address resolves through
//! the HDF5 start offset recorded when the superblock signature is found
//! (0 for native files, 512 for MATLAB-wrapped ones).

use crate::error::Error;
use crate::parse;

enum Bytes {
    Mapped(memmap::Mmap),
    Owned(Vec<u8>),
}

/// The file's bytes plus the offset of the HDF5 region within them.
pub struct ByteSource {
    bytes: Bytes,
    start: usize,
}

impl ByteSource {
    /// Memory-map an open file.
    pub fn map_file(file: &std::fs::File) -> Result<Self, Error> {
        let map = unsafe { memmap::Mmap::map(file)? };
        Ok(ByteSource {
            bytes: Bytes::Mapped(map),
            start: 0,
        })
    }

    /// Wrap an in-memory buffer.
    pub fn from_buffer(buffer: Vec<u8>) -> Self {
        ByteSource {
            bytes: Bytes::Owned(buffer),
            start: 0,
        }
    }

    fn data(&self) -> &[u8] {
        match &self.bytes {
            Bytes::Mapped(m) => m,
            Bytes::Owned(v) => v,
        }
    }

    /// The entire file, ignoring the start offset. Used only by the
    /// superblock signature scan.
    pub(crate) fn whole(&self) -> &[u8] {
        self.data()
    }

    pub(crate) fn set_start(&mut self, start: usize) {
        self.start = start;
    }

    /// Length of the HDF5 region in bytes.
    pub fn len(&self) -> u64 {
        (self.data().len() - self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bytes from `start + address` to the end of the file.
    pub fn slice_at(&self, address: u64) -> Result<&[u8], Error> {
        if address == parse::UNDEFINED_ADDRESS {
            return Err(Error::TruncatedFile);
        }
        let pos = (self.start as u64)
            .checked_add(address)
            .ok_or(Error::TruncatedFile)?;
        let data = self.data();
        if pos > data.len() as u64 {
            return Err(Error::TruncatedFile);
        }
        Ok(&data[pos as usize..])
    }

    /// A cursor positioned at `address`.
    pub fn cursor(&self, address: u64) -> Cursor<'_> {
        Cursor {
            source: self,
            address,
        }
    }
}

/// A position-carrying reader over a [`ByteSource`].
///
/// All multi-byte reads are little-endian. Positions are HDF5 addresses,
/// not raw file offsets. Callers that jump to an unrelated address mid
/// operation (heap lookups, B-tree descent) must do so inside
/// [`with_saved_position`](Cursor::with_saved_position) so the jump cannot
/// leak into subsequent reads.
pub struct Cursor<'a> {
    source: &'a ByteSource,
    address: u64,
}

impl<'a> Cursor<'a> {
    pub fn position(&self) -> u64 {
        self.address
    }

    pub fn seek(&mut self, address: u64) {
        self.address = address;
    }

    /// Everything from the current position to the end of the file.
    pub fn remaining(&self) -> Result<&'a [u8], Error> {
        self.source.slice_at(self.address)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let data = self.remaining()?;
        if data.len() < n {
            return Err(Error::TruncatedFile);
        }
        self.address += n as u64;
        Ok(&data[..n])
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.read_bytes(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        self.read_u32().map(|v| v as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        self.read_u64().map(|v| v as i64)
    }

    /// Read an offset or length of the superblock-declared width,
    /// normalizing the all-ones sentinel to `UNDEFINED_ADDRESS`.
    pub fn read_offset(&mut self, width: u8) -> Result<u64, Error> {
        let bytes = self.read_bytes(width as usize)?;
        if bytes.iter().all(|b| *b == 0xFF) {
            return Ok(parse::UNDEFINED_ADDRESS);
        }
        Ok(parse::le_uint(bytes))
    }

    /// Run a nom parser at the current position and advance past what it
    /// consumed.
    pub fn parse<O>(
        &mut self,
        f: impl FnOnce(&'a [u8]) -> parse::Result<'a, O>,
    ) -> Result<O, Error> {
        let input = self.remaining()?;
        let (rest, value) = f(input).map_err(Error::from)?;
        self.address += (input.len() - rest.len()) as u64;
        Ok(value)
    }

    /// Save the position, run `body`, and restore the position whether or
    /// not `body` succeeded.
    pub fn with_saved_position<T>(
        &mut self,
        body: impl FnOnce(&mut Cursor<'a>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let saved = self.address;
        let result = body(self);
        self.address = saved;
        result
    }
}
