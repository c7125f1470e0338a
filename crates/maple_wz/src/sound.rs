//! `Sound_DX8` payloads

use std::io::Cursor;

use binrw::{BinRead, BinResult, BinWrite};

use crate::error::Result;
use crate::property::Payload;

/// Media type block preceding the wave header of every sound
#[rustfmt::skip]
pub const SOUND_HEADER: [u8; 51] = [
    0x02,
    0x83, 0xEB, 0x36, 0xE4, 0x4F, 0x52, 0xCE, 0x11, 0x9F, 0x53, 0x00, 0x20, 0xAF, 0x0B, 0xA7, 0x70,
    0x8B, 0xEB, 0x36, 0xE4, 0x4F, 0x52, 0xCE, 0x11, 0x9F, 0x53, 0x00, 0x20, 0xAF, 0x0B, 0xA7, 0x70,
    0x00,
    0x01,
    0x81, 0x9F, 0x58, 0x05, 0x56, 0xC3, 0xCE, 0x11, 0xBF, 0x01, 0x00, 0xAA, 0x00, 0x55, 0x59, 0x5A,
];

/// Wave format tag of uncompressed PCM audio
pub const WAVE_FORMAT_PCM: u16 = 0x0001;

/// Wave format tag of MPEG layer 3 audio
pub const WAVE_FORMAT_MP3: u16 = 0x0055;

/// `WAVEFORMATEX` structure stored after the media type block
#[derive(BinRead, BinWrite, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[brw(little)]
pub struct WaveFormat {
    /// Encoding of the payload
    pub format_tag: u16,
    /// Number of channels
    pub channels: u16,
    /// Samples per second
    pub sample_rate: u32,
    /// Average bytes per second
    pub average_bytes_per_second: u32,
    /// Size of one sample across all channels
    pub block_align: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Size of the extra format information following this structure
    pub extra_size: u16,
}

impl WaveFormat {
    /// Encoded length in bytes
    pub const LEN: usize = 18;

    /// Parses the structure from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        WaveFormat::read(&mut Cursor::new(bytes)).ok()
    }

    /// Encodes the structure
    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(Self::LEN));
        self.write(&mut out)?;
        Ok(out.into_inner())
    }
}

/// Audio clip
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    /// Play time in milliseconds
    pub duration_ms: i32,
    /// Media type block, wave header length byte and wave header
    pub header: Vec<u8>,
    /// Encoded audio
    pub data: Payload,
}

impl Sound {
    /// Builds a sound from encoded audio and its format
    pub fn new(data: Vec<u8>, duration_ms: i32, format: WaveFormat) -> Result<Self> {
        let wave = format.to_bytes()?;
        let mut header = SOUND_HEADER.to_vec();
        header.push(wave.len() as u8);
        header.extend_from_slice(&wave);
        Ok(Self {
            duration_ms,
            header,
            data: Payload::Loaded(data),
        })
    }

    /// Wave header bytes following the media type block
    pub fn wave_header(&self) -> &[u8] {
        self.header.get(SOUND_HEADER.len() + 1..).unwrap_or_default()
    }

    /// Parsed wave header
    pub fn format(&self) -> Option<WaveFormat> {
        WaveFormat::parse(self.wave_header())
    }

    /// Usual file extension of the payload
    pub fn extension(&self) -> &'static str {
        match self.format().map(|f| f.format_tag) {
            Some(WAVE_FORMAT_MP3) => "mp3",
            Some(WAVE_FORMAT_PCM) => "wav",
            _ => "bin",
        }
    }
}
