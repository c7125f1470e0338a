//! Primitive binary I/O over archive streams
//!
//! Integers are little endian. On top of them archives use compressed integers, encrypted strings, string
//! blocks that may point back to an earlier copy of the same string and obfuscated directory offsets.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use maple_crypto::constants::OFFSET_CONSTANT;
use maple_crypto::WzKey;
use widestring::U16String;

use crate::error::{Error, Result};

/// String block tag for an inline string inside a property list
pub const STRING_INLINE: u8 = 0x00;
/// String block tag for a back reference inside a property list
pub const STRING_OFFSET: u8 = 0x01;
/// String block tag for an inline extended property name
pub const EXTENDED_INLINE: u8 = 0x73;
/// String block tag for a back referenced extended property name
pub const EXTENDED_OFFSET: u8 = 0x1B;

/// Strings at most this many UTF-16 units long are never deduplicated
const MIN_CACHED_LEN: usize = 4;

/// Mask combined with the stored bytes of an obfuscated offset found at `position`
pub fn offset_mask(position: u32, data_start: u32, hash: u32) -> u32 {
    let mut mask = position.wrapping_sub(data_start) ^ 0xFFFF_FFFF;
    mask = mask.wrapping_mul(hash);
    mask = mask.wrapping_sub(OFFSET_CONSTANT);
    mask.rotate_left(mask & 0x1F)
}

/// Recovers the offset stored as `stored` at `position`
pub fn decode_offset(stored: u32, position: u32, data_start: u32, hash: u32) -> u32 {
    (offset_mask(position, data_start, hash) ^ stored).wrapping_add(data_start.wrapping_mul(2))
}

/// Computes the bytes storing `offset` at `position`
pub fn encode_offset(offset: u32, position: u32, data_start: u32, hash: u32) -> u32 {
    offset_mask(position, data_start, hash) ^ offset.wrapping_sub(data_start.wrapping_mul(2))
}

/// Number of bytes [`WzWriter::write_compressed_int`] uses for `value`
pub fn compressed_int_len(value: i32) -> usize {
    if value > i8::MIN as i32 && value <= i8::MAX as i32 {
        1
    } else {
        5
    }
}

/// Number of bytes [`WzWriter::write_wz_string`] uses for `value`
pub fn encoded_string_len(value: &str) -> usize {
    if value.is_empty() {
        return 1;
    }
    if is_latin1(value) {
        let len = value.chars().count();
        len + if len > i8::MAX as usize { 5 } else { 1 }
    } else {
        let len = value.encode_utf16().count();
        len * 2 + if len >= i8::MAX as usize { 5 } else { 1 }
    }
}

fn is_latin1(value: &str) -> bool {
    value.chars().all(|c| (c as u32) <= 0xFF)
}

pub(crate) fn is_cacheable(value: &str) -> bool {
    value.encode_utf16().count() > MIN_CACHED_LEN
}

/// Reader decoding the primitives of an archive stream
pub struct WzReader<R> {
    inner: R,
    key: WzKey,
    encrypted: bool,
    hash: u32,
    data_start: u32,
    len: u64,
}

impl<R: Read + Seek> WzReader<R> {
    /// Wraps `inner`, measuring the stream length
    pub fn new(mut inner: R, key: WzKey) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            encrypted: !key.is_zero(),
            key,
            hash: 0,
            data_start: 0,
            len,
        })
    }

    /// Key used for strings
    pub fn key(&self) -> &WzKey {
        &self.key
    }

    /// Version hash used for offsets
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Replaces the version hash used for offsets
    pub fn set_hash(&mut self, hash: u32) {
        self.hash = hash;
    }

    /// Offset every obfuscated offset is relative to
    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    /// Replaces the data start
    pub fn set_data_start(&mut self, data_start: u32) {
        self.data_start = data_start;
    }

    /// Length of the underlying stream
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the underlying stream is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current position
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Moves to an absolute position
    pub fn seek_to(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Bytes left between the current position and the end of the stream
    pub fn remaining(&mut self) -> Result<u64> {
        Ok(self.len.saturating_sub(self.position()?))
    }

    /// Reads the next byte without consuming it
    pub fn peek_u8(&mut self) -> Result<u8> {
        let position = self.position()?;
        let value = self.read_u8()?;
        self.seek_to(position)?;
        Ok(value)
    }

    /// Reads `len` bytes, refusing lengths past the end of the stream
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.remaining()? {
            return Err(Error::IOError(io::ErrorKind::UnexpectedEof.into()));
        }
        let mut buffer = vec![0u8; len];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Moves forward by `count` bytes
    pub fn skip(&mut self, count: i64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    /// Reads a compressed 32 bit integer
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            return Ok(self.read_i32::<LittleEndian>()?);
        }
        Ok(small as i32)
    }

    /// Reads a compressed 64 bit integer
    pub fn read_compressed_long(&mut self) -> Result<i64> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            return Ok(self.read_i64::<LittleEndian>()?);
        }
        Ok(small as i64)
    }

    /// Reads an encrypted, length prefixed string
    pub fn read_wz_string(&mut self) -> Result<String> {
        let small = self.read_i8()?;
        match small {
            0 => Ok(String::new()),
            1.. => {
                let len = if small == i8::MAX {
                    self.read_i32::<LittleEndian>()?
                } else {
                    small as i32
                };
                if len <= 0 {
                    return Ok(String::new());
                }
                self.read_utf16(len as usize)
            }
            _ => {
                let len = if small == i8::MIN {
                    self.read_i32::<LittleEndian>()?
                } else {
                    -(small as i32)
                };
                if len <= 0 {
                    return Ok(String::new());
                }
                self.read_latin1(len as usize)
            }
        }
    }

    fn read_latin1(&mut self, len: usize) -> Result<String> {
        if self.encrypted && len > self.key.len() {
            return Err(Error::StringTooLong(len));
        }
        let bytes = self
            .read_bytes(len)
            .map_err(|_| Error::StringTooLong(len))?;

        Ok(bytes
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let mask = 0xAAu8.wrapping_add(i as u8);
                char::from(b ^ mask ^ self.key.get(i).unwrap_or(0))
            })
            .collect())
    }

    fn read_utf16(&mut self, len: usize) -> Result<String> {
        if self.encrypted && len * 2 > self.key.len() {
            return Err(Error::StringTooLong(len));
        }
        let bytes = self
            .read_bytes(len * 2)
            .map_err(|_| Error::StringTooLong(len))?;

        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| {
                let mask = 0xAAAAu16.wrapping_add(i as u16);
                u16::from_le_bytes([pair[0], pair[1]]) ^ mask ^ self.key.word(i).unwrap_or(0)
            })
            .collect();
        Ok(U16String::from_vec(units).to_string_lossy())
    }

    /// Reads the string stored at `offset`, leaving the position unchanged
    pub fn read_string_at(&mut self, offset: u64) -> Result<String> {
        let position = self.position()?;
        self.seek_to(offset)?;
        let value = self.read_wz_string();
        self.seek_to(position)?;
        value
    }

    /// Reads a string block whose back references are relative to `base`
    pub fn read_string_block(&mut self, base: u64) -> Result<String> {
        let offset = self.position()?;
        match self.read_u8()? {
            STRING_INLINE | EXTENDED_INLINE => self.read_wz_string(),
            STRING_OFFSET | EXTENDED_OFFSET => {
                let relative = self.read_i32::<LittleEndian>()?;
                self.read_string_at(base.wrapping_add_signed(relative as i64))
            }
            tag => Err(Error::UnknownStringTag { tag, offset }),
        }
    }

    /// Reads an obfuscated offset
    pub fn read_offset(&mut self) -> Result<u32> {
        let position = self.position()? as u32;
        let stored = self.read_u32::<LittleEndian>()?;
        Ok(decode_offset(stored, position, self.data_start, self.hash))
    }

    /// Unwrap and return the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for WzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for WzReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Writer encoding the primitives of an archive stream
///
/// Each writer owns its own string caches, so deduplication never crosses a save call.
pub struct WzWriter<W> {
    inner: W,
    key: WzKey,
    encrypted: bool,
    hash: u32,
    data_start: u32,
    strings: HashMap<String, u32>,
    objects: HashMap<(u8, String), u32>,
}

impl<W: Write + Seek> WzWriter<W> {
    /// Wraps `inner`
    pub fn new(inner: W, key: WzKey, hash: u32, data_start: u32) -> Self {
        Self {
            inner,
            encrypted: !key.is_zero(),
            key,
            hash,
            data_start,
            strings: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    /// Current position
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Writes a compressed 32 bit integer
    pub fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        if compressed_int_len(value) == 1 {
            self.write_i8(value as i8)?;
        } else {
            self.write_i8(i8::MIN)?;
            self.write_i32::<LittleEndian>(value)?;
        }
        Ok(())
    }

    /// Writes a compressed 64 bit integer
    pub fn write_compressed_long(&mut self, value: i64) -> Result<()> {
        if value > i8::MIN as i64 && value <= i8::MAX as i64 {
            self.write_i8(value as i8)?;
        } else {
            self.write_i8(i8::MIN)?;
            self.write_i64::<LittleEndian>(value)?;
        }
        Ok(())
    }

    /// Writes an encrypted, length prefixed string
    pub fn write_wz_string(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            self.write_u8(0)?;
            return Ok(());
        }

        if is_latin1(value) {
            let len = value.chars().count();
            if self.encrypted && len > self.key.len() {
                return Err(Error::StringTooLong(len));
            }
            if len > i8::MAX as usize {
                self.write_i8(i8::MIN)?;
                self.write_i32::<LittleEndian>(len as i32)?;
            } else {
                self.write_i8(-(len as i32) as i8)?;
            }

            let bytes: Vec<u8> = value
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    let mask = 0xAAu8.wrapping_add(i as u8);
                    c as u8 ^ mask ^ self.key.get(i).unwrap_or(0)
                })
                .collect();
            self.write_all(&bytes)?;
        } else {
            let units: Vec<u16> = value.encode_utf16().collect();
            let len = units.len();
            if self.encrypted && len * 2 > self.key.len() {
                return Err(Error::StringTooLong(len));
            }
            if len >= i8::MAX as usize {
                self.write_i8(i8::MAX)?;
                self.write_i32::<LittleEndian>(len as i32)?;
            } else {
                self.write_i8(len as i8)?;
            }

            for (i, unit) in units.into_iter().enumerate() {
                let mask = 0xAAAAu16.wrapping_add(i as u16);
                let encrypted = unit ^ mask ^ self.key.word(i).unwrap_or(0);
                self.write_u16::<LittleEndian>(encrypted)?;
            }
        }
        Ok(())
    }

    /// Writes a string block, pointing back to an earlier copy of `value` when one exists
    ///
    /// Back references are positions within this writer's stream.
    pub fn write_string_value(&mut self, value: &str, inline_tag: u8, offset_tag: u8) -> Result<()> {
        if is_cacheable(value) {
            if let Some(&offset) = self.strings.get(value) {
                self.write_u8(offset_tag)?;
                self.write_i32::<LittleEndian>(offset as i32)?;
                return Ok(());
            }
        }

        self.write_u8(inline_tag)?;
        let offset = self.position()? as u32;
        self.write_wz_string(value)?;
        self.strings.entry(value.to_owned()).or_insert(offset);
        Ok(())
    }

    /// Writes a directory entry type and name, pointing back to an earlier entry of the same type and name
    pub fn write_object_value(&mut self, value: &str, kind: u8) -> Result<()> {
        let cache_key = (kind, value.to_owned());
        if is_cacheable(value) {
            if let Some(&offset) = self.objects.get(&cache_key) {
                self.write_u8(crate::directory::ENTRY_REFERENCE)?;
                self.write_i32::<LittleEndian>(offset as i32)?;
                return Ok(());
            }
        }

        let offset = (self.position()? as u32).wrapping_sub(self.data_start);
        self.write_u8(kind)?;
        self.write_wz_string(value)?;
        self.objects.entry(cache_key).or_insert(offset);
        Ok(())
    }

    /// Writes `offset` obfuscated for the current position
    pub fn write_offset(&mut self, offset: u32) -> Result<()> {
        let position = self.position()? as u32;
        let stored = encode_offset(offset, position, self.data_start, self.hash);
        self.write_u32::<LittleEndian>(stored)?;
        Ok(())
    }

    /// Gets a reference to the inner writer
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap and return the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for WzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Seek> Seek for WzWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
