//! Positioned big-endian reader/writer over a byte buffer.

use crate::binary::consts::VARINT_ENCODE_MAX;
use crate::error::CodecError;

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Cursor over a byte buffer with big-endian integer and varint access.
///
/// Reads are available for any `AsRef<[u8]>`; writes additionally need
/// `AsMut<[u8]>`. Every operation advances the cursor except the `*_at`
/// variants, which address an explicit offset (used to patch a length field
/// once the payload size is known).
#[derive(Clone, Debug)]
pub struct BinaryCursor<B> {
    buf: B,
    pos: usize,
}

impl<B: AsRef<[u8]>> BinaryCursor<B> {
    pub fn new(buf: B) -> Self {
        Self { buf, pos: 0 }
    }

    /// Cursor starting at `offset`; fails if the offset lies past the end.
    pub fn with_offset(buf: B, offset: usize) -> CodecResult<Self> {
        let capacity = buf.as_ref().len();
        if offset > capacity {
            return Err(CodecError::Bounds {
                offset,
                len: 0,
                capacity,
            });
        }
        Ok(Self { buf, pos: offset })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.pos
    }

    /// Bytes from the current position to the end.
    pub fn remainder(&self) -> &[u8] {
        &self.buf.as_ref()[self.pos..]
    }

    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    fn check(&self, offset: usize, len: usize) -> CodecResult<usize> {
        let capacity = self.capacity();
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(end),
            _ => Err(CodecError::Bounds {
                offset,
                len,
                capacity,
            }),
        }
    }

    pub fn skip(&mut self, n: usize) -> CodecResult<()> {
        self.pos = self.check(self.pos, n)?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.check(self.pos, 1)?;
        let b = self.buf.as_ref()[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads a big-endian unsigned integer of `width` bytes (1..=8).
    pub fn read_uint(&mut self, width: usize) -> CodecResult<u64> {
        let v = self.read_uint_at(self.pos, width)?;
        self.pos += width;
        Ok(v)
    }

    /// Reads a big-endian unsigned integer at `offset` without moving the cursor.
    pub fn read_uint_at(&self, offset: usize, width: usize) -> CodecResult<u64> {
        if !(1..=8).contains(&width) {
            return Err(CodecError::Width(width));
        }
        let end = self.check(offset, width)?;
        Ok(self.buf.as_ref()[offset..end]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> CodecResult<&[u8]> {
        let start = self.pos;
        let end = self.check(start, n)?;
        self.pos = end;
        Ok(&self.buf.as_ref()[start..end])
    }

    /// Decodes a varint. All six prefix tiers are accepted, including the
    /// plain 32- and 64-bit forms the encoder never produces.
    pub fn read_varint(&mut self) -> CodecResult<u64> {
        let first = self.read_u8()? as u64;
        if first & 0x80 == 0 {
            Ok(first)
        } else if first & 0xC0 == 0x80 {
            Ok(((first & 0x3F) << 8) | self.read_uint(1)?)
        } else if first & 0xE0 == 0xC0 {
            Ok(((first & 0x1F) << 16) | self.read_uint(2)?)
        } else if first & 0xF0 == 0xE0 {
            Ok(((first & 0x0F) << 24) | self.read_uint(3)?)
        } else if first & 0xFC == 0xF0 {
            self.read_uint(4)
        } else if first & 0xFC == 0xF4 {
            self.read_uint(8)
        } else {
            Err(CodecError::VarintPrefix(first as u8))
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BinaryCursor<B> {
    pub fn write_u8(&mut self, v: u8) -> CodecResult<()> {
        self.check(self.pos, 1)?;
        self.buf.as_mut()[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    /// Writes `v` as a big-endian integer of `width` bytes (1..=8).
    pub fn write_uint(&mut self, v: u64, width: usize) -> CodecResult<()> {
        self.write_uint_at(self.pos, v, width)?;
        self.pos += width;
        Ok(())
    }

    /// Writes at `offset` without moving the cursor.
    pub fn write_uint_at(&mut self, offset: usize, v: u64, width: usize) -> CodecResult<()> {
        if !(1..=8).contains(&width) {
            return Err(CodecError::Width(width));
        }
        if width < 8 && v >> (width * 8) != 0 {
            return Err(CodecError::Width(width));
        }
        let end = self.check(offset, width)?;
        let bytes = v.to_be_bytes();
        self.buf.as_mut()[offset..end].copy_from_slice(&bytes[8 - width..]);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> CodecResult<()> {
        self.write_uint(v as u64, 2)
    }

    pub fn write_u32(&mut self, v: u32) -> CodecResult<()> {
        self.write_uint(v as u64, 4)
    }

    pub fn write_f32(&mut self, v: f32) -> CodecResult<()> {
        self.write_u32(v.to_bits())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> CodecResult<()> {
        let end = self.check(self.pos, data.len())?;
        self.buf.as_mut()[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    /// Encodes a varint using the 1- to 4-byte tiers; returns the byte count.
    pub fn write_varint(&mut self, v: u64) -> CodecResult<usize> {
        let width = varint_len(v)?;
        let prefix: u64 = match width {
            1 => 0,
            2 => 0x80,
            3 => 0xC0,
            _ => 0xE0,
        };
        let shifted = prefix << ((width - 1) * 8);
        self.write_uint(v | shifted, width)?;
        Ok(width)
    }
}

/// Encoded size of `v`, or an error if the encoder does not support it.
pub fn varint_len(v: u64) -> CodecResult<usize> {
    match v {
        0..=0x7F => Ok(1),
        0x80..=0x3FFF => Ok(2),
        0x4000..=0x1F_FFFF => Ok(3),
        0x20_0000..=VARINT_ENCODE_MAX => Ok(4),
        _ => Err(CodecError::VarintTooLarge(v)),
    }
}
