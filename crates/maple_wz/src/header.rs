//! Archive file header

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, NullString};

use crate::error::{Error, Result};

/// Identifier written to new archives
pub const DEFAULT_IDENT: [u8; 4] = *b"PKG1";

/// Copyright notice written to new archives
pub const DEFAULT_COPYRIGHT: &str = "Package file v1.0 Copyright 2002 Wizet, ZMS";

/// Archive file header
///
/// The header is followed by padding up to [`WzHeader::data_start`]. All data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(little)]
pub struct WzHeader {
    /// Identifier, `PKG1` for every known archive
    pub ident: [u8; 4],

    /// Number of bytes following the data start
    pub size: u64,

    /// Offset of the version field and the root directory
    pub data_start: u32,

    /// Copyright notice
    pub copyright: NullString,
}

impl Default for WzHeader {
    fn default() -> Self {
        let mut header = Self {
            ident: DEFAULT_IDENT,
            size: 0,
            data_start: 0,
            copyright: NullString::from(DEFAULT_COPYRIGHT),
        };
        header.recalculate_data_start();
        header
    }
}

impl WzHeader {
    /// Number of bytes the header fields occupy, without padding
    pub fn encoded_len(&self) -> u64 {
        4 + 8 + 4 + self.copyright.0.len() as u64 + 1
    }

    /// Moves the data start right after the header fields
    pub fn recalculate_data_start(&mut self) {
        self.data_start = self.encoded_len() as u32;
    }

    /// Reads and validates a header at the start of `reader`, returning it with its padding bytes
    #[tracing::instrument(skip(reader), err)]
    pub fn read_validated<R: Read + Seek>(
        reader: &mut R,
        stream_len: u64,
    ) -> Result<(Self, Vec<u8>)> {
        reader.seek(SeekFrom::Start(0))?;
        let header = WzHeader::read(reader)
            .map_err(|e| Error::MalformedHeader(format!("unreadable header: {e}")))?;

        let start = header.data_start as u64;
        if start < header.encoded_len() || start > stream_len {
            return Err(Error::MalformedHeader(format!(
                "data start {start:#X} outside of the stream (length {stream_len:#X})"
            )));
        }
        if start.checked_add(header.size).map_or(true, |end| end > stream_len) {
            return Err(Error::MalformedHeader(format!(
                "declared size {:#X} exceeds the stream (length {stream_len:#X})",
                header.size
            )));
        }

        let mut padding = vec![0u8; (start - header.encoded_len()) as usize];
        reader.read_exact(&mut padding)?;
        Ok((header, padding))
    }

    /// Writes the header followed by `padding`, zero extended up to the data start
    pub fn write_padded<W: Write + Seek>(&self, writer: &mut W, padding: &[u8]) -> Result<()> {
        self.write(writer)?;
        let wanted = (self.data_start as u64).saturating_sub(self.encoded_len()) as usize;
        let kept = usize::min(wanted, padding.len());
        writer.write_all(&padding[..kept])?;
        writer.write_all(&vec![0u8; wanted - kept])?;
        Ok(())
    }
}
