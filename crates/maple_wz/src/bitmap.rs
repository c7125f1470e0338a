//! Canvas pixel data
//!
//! | Code | Layout                                                                    |
//! |------|---------------------------------------------------------------------------|
//! | 1    | BGRA, 4 bits per channel                                                  |
//! | 2    | BGRA, 8 bits per channel                                                  |
//! | 3    | One BGRA4444 pixel per 4x4 block                                          |
//! | 257  | ARGB1555                                                                  |
//! | 513  | RGB565                                                                    |
//! | 517  | Monochrome, one bit per run of 16 pixels, most significant bit first      |
//! | 1026 | DXT3                                                                      |
//! | 2050 | DXT5                                                                      |
//!
//! The code is the sum of the canvas format and its sub-format byte. Pixel data is DEFLATE compressed
//! behind a two byte zlib header. Some archives additionally split the compressed stream into blocks
//! (4 byte length followed by the block XORed with the archive key).

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use flate2::{read::DeflateDecoder, write::ZlibEncoder, Compression};
use maple_crypto::WzKey;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::property::Payload;

/// Largest number of pixels a bitmap may decode to
pub const MAX_PIXELS: u64 = 1 << 26;

const ZLIB_HEADERS: [u16; 4] = [0x9C78, 0xDA78, 0x0178, 0x5E78];

/// Pixel layouts understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bits per channel
    Bgra4444,
    /// 8 bits per channel
    Bgra8888,
    /// One 4 bits per channel pixel for each 4x4 block
    Bgra4444Block,
    /// 5 bits per color channel, 1 bit alpha
    Argb1555,
    /// 5-6-5 bits color, opaque
    Rgb565,
    /// 1 bit per run of 16 pixels
    Monochrome,
    /// DXT3 block compression
    Dxt3,
    /// DXT5 block compression
    Dxt5,
}

impl PixelFormat {
    /// Resolves a format code
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => PixelFormat::Bgra4444,
            2 => PixelFormat::Bgra8888,
            3 => PixelFormat::Bgra4444Block,
            257 => PixelFormat::Argb1555,
            513 => PixelFormat::Rgb565,
            517 => PixelFormat::Monochrome,
            1026 => PixelFormat::Dxt3,
            2050 => PixelFormat::Dxt5,
            _ => return None,
        })
    }

    /// Format code of this layout
    pub fn code(self) -> i32 {
        match self {
            PixelFormat::Bgra4444 => 1,
            PixelFormat::Bgra8888 => 2,
            PixelFormat::Bgra4444Block => 3,
            PixelFormat::Argb1555 => 257,
            PixelFormat::Rgb565 => 513,
            PixelFormat::Monochrome => 517,
            PixelFormat::Dxt3 => 1026,
            PixelFormat::Dxt5 => 2050,
        }
    }

    /// Number of decompressed bytes an image of `width` by `height` pixels occupies
    pub fn data_len(self, width: usize, height: usize) -> usize {
        let blocks = width.div_ceil(4) * height.div_ceil(4);
        match self {
            PixelFormat::Bgra4444 | PixelFormat::Argb1555 | PixelFormat::Rgb565 => width * height * 2,
            PixelFormat::Bgra8888 => width * height * 4,
            PixelFormat::Bgra4444Block => blocks * 2,
            PixelFormat::Monochrome => width * height / 128,
            PixelFormat::Dxt3 | PixelFormat::Dxt5 => blocks * 16,
        }
    }
}

/// Format fields stored with a canvas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BitmapFormat {
    /// Format field
    pub format: i32,
    /// Sub-format byte, added to the format field
    pub format2: u8,
}

impl BitmapFormat {
    /// Combined format code
    pub fn code(self) -> i32 {
        self.format.wrapping_add(self.format2 as i32)
    }

    /// Layout selected by the code, if known
    pub fn pixel_format(self) -> Option<PixelFormat> {
        PixelFormat::from_code(self.code())
    }
}

/// Canvas bitmap as stored in the archive
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Format fields
    pub format: BitmapFormat,
    /// Compressed pixel data
    pub data: Payload,
}

impl Bitmap {
    /// Compresses `pixels` as 8 bits per channel BGRA
    ///
    /// With a key the compressed stream is split into key blocks, otherwise it is stored as plain zlib.
    #[instrument(skip(pixels, key), fields(width = pixels.width, height = pixels.height), err)]
    pub fn encode(pixels: &Pixels, key: Option<&WzKey>) -> Result<Self> {
        let mut bgra = pixels.data.clone();
        for pixel in bgra.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bgra)?;
        let compressed = encoder.finish()?;

        let data = match key {
            Some(key) => wrap_key_blocks(&compressed, key),
            None => compressed,
        };

        Ok(Self {
            width: pixels.width as i32,
            height: pixels.height as i32,
            format: BitmapFormat {
                format: PixelFormat::Bgra8888.code(),
                format2: 0,
            },
            data: Payload::Loaded(data),
        })
    }

    /// Decodes the compressed bytes `raw` of this bitmap
    pub fn decode(&self, raw: &[u8], key: &WzKey) -> Result<Pixels> {
        let code = self.format.code();
        let format = PixelFormat::from_code(code).ok_or(Error::UnsupportedBitmapFormat(code))?;
        let (width, height) = checked_dimensions(self.width, self.height)?;

        let expected = format.data_len(width, height);
        let data = inflate(raw, key, expected)?;
        decode_pixels(format, width, height, &data)
    }
}

/// Decoded pixels, 8 bits per channel in RGBA order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixels {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row major RGBA bytes
    pub data: Vec<u8>,
}

impl Pixels {
    /// Fully transparent image
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    /// Wraps RGBA bytes, checking their length
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(Error::InvalidBitmapData(format!(
                "{} bytes cannot hold {width}x{height} pixels",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// RGBA value at `x`, `y`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * 4;
        let mut pixel = [0u8; 4];
        pixel.copy_from_slice(&self.data[start..start + 4]);
        Some(pixel)
    }

    fn put(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        if x < self.width as usize && y < self.height as usize {
            let start = (y * self.width as usize + x) * 4;
            self.data[start..start + 4].copy_from_slice(&rgba);
        }
    }
}

fn checked_dimensions(width: i32, height: i32) -> Result<(usize, usize)> {
    if width <= 0 || height <= 0 || width as u64 * height as u64 > MAX_PIXELS {
        return Err(Error::InvalidBitmapData(format!(
            "unusable dimensions {width}x{height}"
        )));
    }
    Ok((width as usize, height as usize))
}

fn wrap_key_blocks(compressed: &[u8], key: &WzKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(compressed.len() + 16);
    let (head, rest) = compressed.split_at(usize::min(2, compressed.len()));

    for block in std::iter::once(head).chain(rest.chunks(key.len())) {
        if block.is_empty() {
            continue;
        }
        out.extend_from_slice(&(block.len() as i32).to_le_bytes());
        out.extend(
            block
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key.get(i).unwrap_or(0)),
        );
    }
    out
}

fn unwrap_key_blocks(raw: &[u8], key: &WzKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut position = 0;
    while position + 4 <= raw.len() {
        let len = LittleEndian::read_i32(&raw[position..]);
        position += 4;
        if len <= 0 || len as usize > key.len() || position + len as usize > raw.len() {
            return Err(Error::InvalidBitmapData(format!(
                "key block of {len} bytes at {position:#X}"
            )));
        }
        let block = &raw[position..position + len as usize];
        out.extend(
            block
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key.get(i).unwrap_or(0)),
        );
        position += len as usize;
    }
    Ok(out)
}

/// Strips the optional key blocks and zlib header from `raw`, inflating exactly `expected` bytes
pub fn inflate(raw: &[u8], key: &WzKey, expected: usize) -> Result<Vec<u8>> {
    if raw.len() < 2 {
        return Err(Error::InvalidBitmapData("missing compressed stream".into()));
    }

    let unwrapped;
    let stream = if ZLIB_HEADERS.contains(&LittleEndian::read_u16(raw)) {
        &raw[2..]
    } else {
        unwrapped = unwrap_key_blocks(raw, key)?;
        unwrapped
            .get(2..)
            .ok_or_else(|| Error::InvalidBitmapData("missing compressed stream".into()))?
    };

    let mut data = Vec::with_capacity(expected);
    DeflateDecoder::new(stream)
        .take(expected as u64)
        .read_to_end(&mut data)
        .map_err(|e| Error::InvalidBitmapData(e.to_string()))?;
    if data.len() < expected {
        return Err(Error::InvalidBitmapData(format!(
            "expected {expected} bytes of pixel data, found {}",
            data.len()
        )));
    }
    Ok(data)
}

#[inline]
fn expand4(value: u8) -> u8 {
    (value & 0x0F) | (value << 4)
}

#[inline]
fn expand5(value: u16) -> u8 {
    let value = (value & 0x1F) as u8;
    (value << 3) | (value >> 2)
}

#[inline]
fn expand6(value: u16) -> u8 {
    let value = (value & 0x3F) as u8;
    (value << 2) | (value >> 4)
}

fn bgra4444(low: u8, high: u8) -> [u8; 4] {
    [expand4(high), expand4(low >> 4), expand4(low), expand4(high >> 4)]
}

fn rgb565(value: u16) -> [u8; 3] {
    [expand5(value >> 11), expand6(value >> 5), expand5(value)]
}

/// Converts decompressed pixel data into RGBA
pub fn decode_pixels(format: PixelFormat, width: usize, height: usize, data: &[u8]) -> Result<Pixels> {
    let expected = format.data_len(width, height);
    if data.len() < expected {
        return Err(Error::InvalidBitmapData(format!(
            "expected {expected} bytes of pixel data, found {}",
            data.len()
        )));
    }

    let mut pixels = Pixels::new(width as u32, height as u32);
    match format {
        PixelFormat::Bgra4444 => {
            for (i, pair) in data[..expected].chunks_exact(2).enumerate() {
                pixels.put(i % width, i / width, bgra4444(pair[0], pair[1]));
            }
        }
        PixelFormat::Bgra8888 => {
            for (i, bgra) in data[..expected].chunks_exact(4).enumerate() {
                pixels.put(i % width, i / width, [bgra[2], bgra[1], bgra[0], bgra[3]]);
            }
        }
        PixelFormat::Bgra4444Block => {
            let blocks_wide = width.div_ceil(4);
            for (i, pair) in data[..expected].chunks_exact(2).enumerate() {
                let rgba = bgra4444(pair[0], pair[1]);
                let (bx, by) = (i % blocks_wide * 4, i / blocks_wide * 4);
                for y in by..by + 4 {
                    for x in bx..bx + 4 {
                        pixels.put(x, y, rgba);
                    }
                }
            }
        }
        PixelFormat::Argb1555 => {
            for y in 0..height {
                let row = &data[y * width * 2..(y + 1) * width * 2];
                for (x, pair) in row.chunks_exact(2).enumerate() {
                    let value = u16::from_le_bytes([pair[0], pair[1]]);
                    let alpha = if value & 0x8000 != 0 { 0xFF } else { 0x00 };
                    pixels.put(
                        x,
                        y,
                        [expand5(value >> 10), expand5(value >> 5), expand5(value), alpha],
                    );
                }
            }
        }
        PixelFormat::Rgb565 => {
            for y in 0..height {
                let row = &data[y * width * 2..(y + 1) * width * 2];
                for (x, pair) in row.chunks_exact(2).enumerate() {
                    let [r, g, b] = rgb565(u16::from_le_bytes([pair[0], pair[1]]));
                    pixels.put(x, y, [r, g, b, 0xFF]);
                }
            }
        }
        PixelFormat::Monochrome => {
            let (mut x, mut y) = (0, 0);
            for &byte in &data[..expected] {
                for bit in (0..8).rev() {
                    let shade = if byte >> bit & 1 == 1 { 0xFF } else { 0x00 };
                    for _ in 0..16 {
                        if x == width {
                            x = 0;
                            y += 1;
                        }
                        pixels.put(x, y, [shade, shade, shade, 0xFF]);
                        x += 1;
                    }
                }
            }
        }
        PixelFormat::Dxt3 | PixelFormat::Dxt5 => {
            let blocks_wide = width.div_ceil(4);
            for (i, block) in data[..expected].chunks_exact(16).enumerate() {
                let decoded = if format == PixelFormat::Dxt3 {
                    decode_dxt3_block(block)
                } else {
                    decode_dxt5_block(block)
                };
                let (bx, by) = (i % blocks_wide * 4, i / blocks_wide * 4);
                for (j, rgba) in decoded.into_iter().enumerate() {
                    pixels.put(bx + j % 4, by + j / 4, rgba);
                }
            }
        }
    }
    Ok(pixels)
}

fn color_table(c0: u16, c1: u16) -> [[u8; 3]; 4] {
    let a = rgb565(c0);
    let b = rgb565(c1);
    let mix = |w0: u16, w1: u16| {
        let mut out = [0u8; 3];
        for channel in 0..3 {
            out[channel] = ((w0 * a[channel] as u16 + w1 * b[channel] as u16 + 1) / 3) as u8;
        }
        out
    };
    [a, b, mix(2, 1), mix(1, 2)]
}

fn color_indices(rows: &[u8]) -> [u8; 16] {
    let mut indices = [0u8; 16];
    for (y, row) in rows.iter().enumerate() {
        for x in 0..4 {
            indices[y * 4 + x] = row >> (x * 2) & 0x03;
        }
    }
    indices
}

fn apply_colors(block: &[u8], alpha: [u8; 16]) -> [[u8; 4]; 16] {
    let colors = color_table(
        u16::from_le_bytes([block[8], block[9]]),
        u16::from_le_bytes([block[10], block[11]]),
    );
    let indices = color_indices(&block[12..16]);

    let mut out = [[0u8; 4]; 16];
    for (i, pixel) in out.iter_mut().enumerate() {
        let [r, g, b] = colors[indices[i] as usize];
        *pixel = [r, g, b, alpha[i]];
    }
    out
}

/// Decodes one 16 byte DXT3 block into 16 RGBA pixels in row major order
pub fn decode_dxt3_block(block: &[u8]) -> [[u8; 4]; 16] {
    let mut alpha = [0u8; 16];
    for (i, byte) in block[..8].iter().enumerate() {
        alpha[i * 2] = expand4(*byte);
        alpha[i * 2 + 1] = expand4(byte >> 4);
    }
    apply_colors(block, alpha)
}

/// Decodes one 16 byte DXT5 block into 16 RGBA pixels in row major order
pub fn decode_dxt5_block(block: &[u8]) -> [[u8; 4]; 16] {
    let (a0, a1) = (block[0] as u32, block[1] as u32);
    let mut levels = [0u8; 8];
    levels[0] = a0 as u8;
    levels[1] = a1 as u8;
    if a0 > a1 {
        for i in 2..8u32 {
            levels[i as usize] = (((8 - i) * a0 + (i - 1) * a1 + 3) / 7) as u8;
        }
    } else {
        for i in 2..6u32 {
            levels[i as usize] = (((6 - i) * a0 + (i - 1) * a1 + 2) / 5) as u8;
        }
        levels[6] = 0x00;
        levels[7] = 0xFF;
    }

    let mut alpha = [0u8; 16];
    for (half, bytes) in block[2..8].chunks_exact(3).enumerate() {
        let mut flags = bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16;
        for j in 0..8 {
            alpha[half * 8 + j] = levels[(flags & 0x07) as usize];
            flags >>= 3;
        }
    }
    apply_colors(block, alpha)
}

#[cfg(test)]
mod test {
    use maple_crypto::{MapleVersion, WzKey};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Result;

    #[rustfmt::skip]
    const DXT3_BLOCK: [u8; 16] = [
        0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE,
        0x00, 0xF8, 0x1F, 0x00,
        0xE4, 0xE4, 0x00, 0xFF,
    ];

    #[rustfmt::skip]
    const DXT5_BLOCK: [u8; 16] = [
        0xFF, 0x00,
        0x88, 0xC6, 0xFA, 0x88, 0xC6, 0xFA,
        0xE0, 0x07, 0x00, 0x00,
        0x1B, 0x1B, 0x1B, 0x1B,
    ];

    #[test]
    fn dxt3_reference_block() {
        #[rustfmt::skip]
        let expected = [
            [255, 0, 0, 0], [0, 0, 255, 17], [170, 0, 85, 34], [85, 0, 170, 51],
            [255, 0, 0, 68], [0, 0, 255, 85], [170, 0, 85, 102], [85, 0, 170, 119],
            [255, 0, 0, 136], [255, 0, 0, 153], [255, 0, 0, 170], [255, 0, 0, 187],
            [85, 0, 170, 204], [85, 0, 170, 221], [85, 0, 170, 238], [85, 0, 170, 255],
        ];
        assert_eq!(decode_dxt3_block(&DXT3_BLOCK), expected);
    }

    #[test]
    fn dxt5_reference_block() {
        #[rustfmt::skip]
        let expected = [
            [0, 85, 0, 255], [0, 170, 0, 0], [0, 0, 0, 219], [0, 255, 0, 182],
            [0, 85, 0, 146], [0, 170, 0, 109], [0, 0, 0, 73], [0, 255, 0, 36],
            [0, 85, 0, 255], [0, 170, 0, 0], [0, 0, 0, 219], [0, 255, 0, 182],
            [0, 85, 0, 146], [0, 170, 0, 109], [0, 0, 0, 73], [0, 255, 0, 36],
        ];
        assert_eq!(decode_dxt5_block(&DXT5_BLOCK), expected);
    }

    #[test]
    fn dxt5_six_level_alpha() {
        let mut block = DXT5_BLOCK;
        block[0] = 0x00;
        block[1] = 0xFF;
        let alpha: Vec<u8> = decode_dxt5_block(&block)[..8].iter().map(|p| p[3]).collect();
        assert_eq!(alpha, vec![0, 255, 51, 102, 153, 204, 0, 255]);
    }

    #[test]
    fn dxt_blocks_are_placed_in_raster_order() -> Result<()> {
        let mut data = DXT3_BLOCK.to_vec();
        data.extend_from_slice(&DXT3_BLOCK);
        data[16..24].fill(0xFF);

        let pixels = decode_pixels(PixelFormat::Dxt3, 8, 4, &data)?;
        assert_eq!(pixels.pixel(0, 0), Some([255, 0, 0, 0]));
        assert_eq!(pixels.pixel(4, 0), Some([255, 0, 0, 255]));
        assert_eq!(pixels.pixel(7, 3), Some([85, 0, 170, 255]));
        Ok(())
    }

    #[test]
    fn decode_bgra4444() -> Result<()> {
        let pixels = decode_pixels(PixelFormat::Bgra4444, 1, 1, &[0x21, 0x43])?;
        assert_eq!(pixels.data, vec![0x33, 0x22, 0x11, 0x44]);
        Ok(())
    }

    #[test]
    fn decode_block_tiled_bgra4444() -> Result<()> {
        let pixels = decode_pixels(PixelFormat::Bgra4444Block, 5, 2, &[0x21, 0x43, 0xF0, 0xF0])?;
        assert_eq!(pixels.pixel(3, 1), Some([0x33, 0x22, 0x11, 0x44]));
        assert_eq!(pixels.pixel(4, 0), Some([0x00, 0xFF, 0x00, 0xFF]));
        Ok(())
    }

    #[test]
    fn decode_16_bit_formats() -> Result<()> {
        let pixels = decode_pixels(PixelFormat::Argb1555, 2, 1, &[0x1F, 0x80, 0xE0, 0x03])?;
        assert_eq!(pixels.pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(pixels.pixel(1, 0), Some([0, 255, 0, 0]));

        let pixels = decode_pixels(PixelFormat::Rgb565, 1, 1, &[0x00, 0xF8])?;
        assert_eq!(pixels.data, vec![255, 0, 0, 255]);
        Ok(())
    }

    #[test]
    fn decode_monochrome_runs() -> Result<()> {
        let pixels = decode_pixels(PixelFormat::Monochrome, 16, 8, &[0b1000_0001])?;
        assert_eq!(pixels.pixel(15, 0), Some([255, 255, 255, 255]));
        assert_eq!(pixels.pixel(0, 1), Some([0, 0, 0, 255]));
        assert_eq!(pixels.pixel(0, 7), Some([255, 255, 255, 255]));
        Ok(())
    }

    #[test]
    fn unknown_format_is_reported() {
        let bitmap = Bitmap {
            width: 1,
            height: 1,
            format: BitmapFormat {
                format: 4,
                format2: 0,
            },
            data: Payload::Loaded(vec![0x78, 0x9C]),
        };
        let result = bitmap.decode(&[0x78, 0x9C], &WzKey::for_version(MapleVersion::Bms));
        assert!(matches!(result, Err(Error::UnsupportedBitmapFormat(4))));
    }

    #[test]
    fn encode_round_trip_plain_and_keyed() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Gms);
        let data: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8 * 7).collect();
        let pixels = Pixels::from_rgba(3, 2, data)?;

        let plain = Bitmap::encode(&pixels, None)?;
        let Payload::Loaded(raw) = &plain.data else {
            panic!("encoded bitmap is not loaded");
        };
        assert_eq!(&raw[..2], &[0x78, 0x9C]);
        assert_eq!(plain.decode(raw, &key)?, pixels);

        let keyed = Bitmap::encode(&pixels, Some(&key))?;
        let Payload::Loaded(raw) = &keyed.data else {
            panic!("encoded bitmap is not loaded");
        };
        assert_eq!(&raw[..4], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(keyed.decode(raw, &key)?, pixels);
        Ok(())
    }

    #[test]
    fn truncated_pixel_data_is_rejected() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Bms);
        let pixels = Pixels::new(2, 2);
        let mut bitmap = Bitmap::encode(&pixels, None)?;
        bitmap.height = 64;

        let Payload::Loaded(raw) = bitmap.data.clone() else {
            panic!("encoded bitmap is not loaded");
        };
        assert!(matches!(
            bitmap.decode(&raw, &key),
            Err(Error::InvalidBitmapData(_))
        ));
        Ok(())
    }
}
