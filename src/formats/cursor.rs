use crate::{Error, Result};
use byteordered::{ByteOrdered, Endianness};

/// Bounds-checked reader over a byte slice. Running off the end produces the
/// error built by `corrupt`, so callers choose between `CorruptIndex` and
/// `CorruptFile`.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endianness: Endianness,
    corrupt: fn(String) -> Error,
}

macro_rules! read_number {
    ($name:ident, $ty:ty, $read:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let at = self.pos;
            let bytes = self.take(std::mem::size_of::<$ty>())?;
            ByteOrdered::runtime(bytes, self.endianness)
                .$read()
                .map_err(|e| (self.corrupt)(format!("offset {}: {}", at, e)))
        }
    };
}

impl<'a> Cursor<'a> {
    /// Little-endian reader.
    pub fn new(data: &'a [u8], corrupt: fn(String) -> Error) -> Self {
        Self {
            data,
            pos: 0,
            endianness: Endianness::Little,
            corrupt,
        }
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err((self.corrupt)(format!(
                "seek to {} past end of {} bytes",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err((self.corrupt)(format!(
                "truncated: wanted {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Bytes up to the next NUL, which is consumed but not returned.
    pub fn c_string(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| (self.corrupt)(format!("unterminated string at offset {}", self.pos)))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    /// A count field that must be non-negative.
    pub fn count(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| (self.corrupt)(format!("negative count {}", n)))
    }

    read_number!(u8, u8, read_u8);
    read_number!(u16, u16, read_u16);
    read_number!(u32, u32, read_u32);
    read_number!(u64, u64, read_u64);
    read_number!(i32, i32, read_i32);
    read_number!(f32, f32, read_f32);
    read_number!(f64, f64, read_f64);
}
