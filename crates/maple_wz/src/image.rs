//! Image property lists
//!
//! An image starts with the extended name `Property` followed by a property list. Every string inside an
//! image that points back to an earlier copy does so relative to the start of the image.
//!
//! A property list is a `u16` of zero, a compressed count and the properties themselves:
//!
//! | Tag      | Value                                            |
//! |----------|--------------------------------------------------|
//! | 0        | none                                             |
//! | 2, 11    | `i16`                                            |
//! | 3, 19    | compressed `i32`                                 |
//! | 20       | compressed `i64`                                 |
//! | 4        | `0x00` for zero, `0x80` followed by an `f32`     |
//! | 5        | `f64`                                            |
//! | 8        | string block                                     |
//! | 9        | `u32` length followed by an extended property    |

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{instrument, warn};

use crate::bitmap::{Bitmap, BitmapFormat};
use crate::cursor::{WzReader, WzWriter, EXTENDED_INLINE, EXTENDED_OFFSET, STRING_INLINE, STRING_OFFSET};
use crate::error::{Error, Result};
use crate::property::{extended, tag, Payload, Point, PropertyValue};
use crate::sound::{Sound, SOUND_HEADER};
use crate::tree::{Node, NodeId, NodeKind, Tree};

/// Source of payload bytes that were left in the archive stream
pub trait PayloadSource {
    /// Reads `len` bytes at `offset`
    fn read_stored(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

impl<R: Read + Seek> PayloadSource for WzReader<R> {
    fn read_stored(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let position = self.position()?;
        self.seek_to(offset)?;
        let bytes = self.read_bytes(len);
        self.seek_to(position)?;
        bytes
    }
}

impl<S: PayloadSource> PayloadSource for Option<S> {
    fn read_stored(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Some(source) => source.read_stored(offset, len),
            None => Err(Error::CustomError(format!(
                "payload at offset {offset:#X} has no backing stream"
            ))),
        }
    }
}

/// Bytes of `payload`, reading them from `source` when they were left in the stream
pub fn load_payload<S: PayloadSource + ?Sized>(source: &mut S, payload: &Payload) -> Result<Vec<u8>> {
    match payload {
        Payload::Stored { offset, len } => source.read_stored(*offset, *len),
        Payload::Loaded(bytes) => Ok(bytes.clone()),
    }
}

/// Parses the property list of `image`, found at `offset`, into the tree
#[instrument(skip(reader, tree), err)]
pub fn parse_image<R: Read + Seek>(
    reader: &mut WzReader<R>,
    tree: &mut Tree,
    image: NodeId,
    offset: u64,
) -> Result<()> {
    reader.seek_to(offset)?;
    let valid = reader.read_u8()? == EXTENDED_INLINE
        && reader.read_wz_string()? == extended::PROPERTY
        && reader.read_u16::<LittleEndian>()? == 0;
    if !valid {
        return Err(Error::InvalidImage { offset });
    }

    parse_property_list(reader, tree, image, offset)
}

fn read_count<R: Read + Seek>(reader: &mut WzReader<R>) -> Result<i32> {
    let offset = reader.position()?;
    let count = reader.read_compressed_int()?;
    if count < 0 || count as u64 > reader.remaining()? {
        return Err(Error::InvalidEntryCount { count, offset });
    }
    Ok(count)
}

/// Inserts a parsed property, keeping the first of two equally named siblings
fn attach(tree: &mut Tree, parent: NodeId, name: String, value: PropertyValue) -> Result<Option<NodeId>> {
    match tree.insert(parent, Node::new(name, NodeKind::Property(value))) {
        Ok(id) => Ok(Some(id)),
        Err(Error::DuplicateName(name)) => {
            warn!("skipping duplicate property {name:?}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn parse_property_list<R: Read + Seek>(
    reader: &mut WzReader<R>,
    tree: &mut Tree,
    parent: NodeId,
    base: u64,
) -> Result<()> {
    let count = read_count(reader)?;
    for _ in 0..count {
        let name = reader.read_string_block(base)?.trim().to_owned();
        let offset = reader.position()?;
        let value = match reader.read_u8()? {
            tag::NULL => PropertyValue::Null,
            tag::SHORT | tag::SHORT_ALT => PropertyValue::Short(reader.read_i16::<LittleEndian>()?),
            tag::INT | tag::INT_ALT => PropertyValue::Int(reader.read_compressed_int()?),
            tag::LONG => PropertyValue::Long(reader.read_compressed_long()?),
            tag::FLOAT => match reader.read_u8()? {
                tag::FLOAT_VALUE => PropertyValue::Float(reader.read_f32::<LittleEndian>()?),
                tag::FLOAT_ZERO => PropertyValue::Float(0.0),
                other => {
                    warn!("skipping float {name:?} with marker {other:#04X}");
                    continue;
                }
            },
            tag::DOUBLE => PropertyValue::Double(reader.read_f64::<LittleEndian>()?),
            tag::STRING => PropertyValue::String(reader.read_string_block(base)?),
            tag::EXTENDED => {
                let len = reader.read_u32::<LittleEndian>()?;
                let end = reader.position()? + len as u64;
                parse_extended(reader, tree, parent, name, base)?;
                reader.seek_to(end)?;
                continue;
            }
            tag => return Err(Error::UnknownPropertyType { tag, offset }),
        };
        attach(tree, parent, name, value)?;
    }
    Ok(())
}

/// Parses one extended property, returning false when its name tag is unknown
fn parse_extended<R: Read + Seek>(
    reader: &mut WzReader<R>,
    tree: &mut Tree,
    parent: NodeId,
    name: String,
    base: u64,
) -> Result<bool> {
    let offset = reader.position()?;
    let kind = match reader.read_u8()? {
        EXTENDED_OFFSET => {
            let relative = reader.read_i32::<LittleEndian>()?;
            reader.read_string_at(base.wrapping_add_signed(relative as i64))?
        }
        EXTENDED_INLINE => reader.read_wz_string()?,
        other => {
            warn!("skipping extended property {name:?} with name tag {other:#04X} at {offset:#X}");
            return Ok(false);
        }
    };

    match kind.as_str() {
        extended::PROPERTY => {
            reader.skip(2)?;
            if let Some(id) = attach(tree, parent, name, PropertyValue::SubProperty)? {
                parse_property_list(reader, tree, id, base)?;
            }
        }
        extended::CANVAS => {
            reader.skip(1)?;
            let placeholder = PropertyValue::Canvas(Bitmap {
                width: 0,
                height: 0,
                format: BitmapFormat::default(),
                data: Payload::Loaded(Vec::new()),
            });
            let Some(id) = attach(tree, parent, name, placeholder)? else {
                return Ok(true);
            };
            if reader.read_u8()? == 1 {
                reader.skip(2)?;
                parse_property_list(reader, tree, id, base)?;
            }
            let bitmap = read_bitmap(reader)?;
            if let Some(node) = tree.get_mut(id) {
                node.kind = NodeKind::Property(PropertyValue::Canvas(bitmap));
            }
        }
        extended::VECTOR => {
            let x = reader.read_compressed_int()?;
            let y = reader.read_compressed_int()?;
            attach(tree, parent, name, PropertyValue::Vector(Point::new(x, y)))?;
        }
        extended::CONVEX => {
            let Some(id) = attach(tree, parent, name, PropertyValue::Convex)? else {
                return Ok(true);
            };
            let count = read_count(reader)?;
            for index in 0..count {
                if !parse_extended(reader, tree, id, index.to_string(), base)? {
                    break;
                }
            }
        }
        extended::SOUND => {
            reader.skip(1)?;
            let len = read_len(reader)?;
            let duration_ms = reader.read_compressed_int()?;
            let mut header = reader.read_bytes(SOUND_HEADER.len())?;
            let wave_len = reader.read_u8()?;
            header.push(wave_len);
            header.extend(reader.read_bytes(wave_len as usize)?);
            let data = stored_payload(reader, len)?;
            attach(
                tree,
                parent,
                name,
                PropertyValue::Sound(Sound {
                    duration_ms,
                    header,
                    data,
                }),
            )?;
        }
        extended::UOL => {
            reader.skip(1)?;
            let position = reader.position()?;
            let path = match reader.read_u8()? {
                STRING_INLINE => reader.read_wz_string()?,
                STRING_OFFSET => {
                    let relative = reader.read_i32::<LittleEndian>()?;
                    reader.read_string_at(base.wrapping_add_signed(relative as i64))?
                }
                tag => return Err(Error::UnknownStringTag { tag, offset: position }),
            };
            attach(tree, parent, name, PropertyValue::Uol(path))?;
        }
        extended::RAW_DATA => {
            reader.skip(1)?;
            let len = read_len(reader)?;
            let data = stored_payload(reader, len)?;
            attach(tree, parent, name, PropertyValue::RawData(data))?;
        }
        _ => return Err(Error::UnknownExtendedName { name: kind, offset }),
    }
    Ok(true)
}

fn read_len<R: Read + Seek>(reader: &mut WzReader<R>) -> Result<usize> {
    let offset = reader.position()?;
    let len = reader.read_compressed_int()?;
    usize::try_from(len).map_err(|_| Error::InvalidEntryCount { count: len, offset })
}

/// Records the location of the next `len` bytes and moves past them
fn stored_payload<R: Read + Seek>(reader: &mut WzReader<R>, len: usize) -> Result<Payload> {
    let offset = reader.position()?;
    if len as u64 > reader.remaining()? {
        return Err(Error::CustomError(format!(
            "payload of {len} bytes at offset {offset:#X} exceeds the stream"
        )));
    }
    reader.seek(SeekFrom::Current(len as i64))?;
    Ok(Payload::Stored { offset, len })
}

fn read_bitmap<R: Read + Seek>(reader: &mut WzReader<R>) -> Result<Bitmap> {
    let width = reader.read_compressed_int()?;
    let height = reader.read_compressed_int()?;
    let format = reader.read_compressed_int()?;
    let format2 = reader.read_u8()?;
    reader.skip(4)?;
    let stored = reader.read_i32::<LittleEndian>()?;
    let len = stored
        .checked_sub(1)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| Error::InvalidBitmapData(format!("negative data length {stored}")))?;
    reader.skip(1)?;
    let data = stored_payload(reader, len)?;
    Ok(Bitmap {
        width,
        height,
        format: BitmapFormat { format, format2 },
        data,
    })
}

/// Serializes the properties of `image`
///
/// The image must start at position zero of `writer` for its back references to resolve.
#[instrument(skip(writer, tree, source), err)]
pub fn write_image<W: Write + Seek, S: PayloadSource + ?Sized>(
    writer: &mut WzWriter<W>,
    tree: &Tree,
    image: NodeId,
    source: &mut S,
) -> Result<()> {
    writer.write_string_value(extended::PROPERTY, EXTENDED_INLINE, EXTENDED_OFFSET)?;
    write_property_list(writer, tree, image, source)
}

fn write_property_list<W: Write + Seek, S: PayloadSource + ?Sized>(
    writer: &mut WzWriter<W>,
    tree: &Tree,
    parent: NodeId,
    source: &mut S,
) -> Result<()> {
    let children = tree.children(parent);
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_compressed_int(children.len() as i32)?;

    for child in children {
        let node = tree.get(child).ok_or(Error::InvalidNode)?;
        let value = node.value().ok_or(Error::InvalidNode)?;
        writer.write_string_value(node.name(), STRING_INLINE, STRING_OFFSET)?;

        if !value.is_extended() {
            write_simple(writer, value)?;
            continue;
        }

        writer.write_u8(tag::EXTENDED)?;
        let len_at = writer.position()?;
        writer.write_u32::<LittleEndian>(0)?;
        write_extended(writer, tree, child, source)?;
        let end = writer.position()?;
        writer.seek(SeekFrom::Start(len_at))?;
        writer.write_u32::<LittleEndian>((end - len_at - 4) as u32)?;
        writer.seek(SeekFrom::Start(end))?;
    }
    Ok(())
}

fn write_simple<W: Write + Seek>(writer: &mut WzWriter<W>, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Null => writer.write_u8(tag::NULL)?,
        PropertyValue::Short(v) => {
            writer.write_u8(tag::SHORT)?;
            writer.write_i16::<LittleEndian>(*v)?;
        }
        PropertyValue::Int(v) => {
            writer.write_u8(tag::INT)?;
            writer.write_compressed_int(*v)?;
        }
        PropertyValue::Long(v) => {
            writer.write_u8(tag::LONG)?;
            writer.write_compressed_long(*v)?;
        }
        PropertyValue::Float(v) => {
            writer.write_u8(tag::FLOAT)?;
            if *v == 0.0 {
                writer.write_u8(tag::FLOAT_ZERO)?;
            } else {
                writer.write_u8(tag::FLOAT_VALUE)?;
                writer.write_f32::<LittleEndian>(*v)?;
            }
        }
        PropertyValue::Double(v) => {
            writer.write_u8(tag::DOUBLE)?;
            writer.write_f64::<LittleEndian>(*v)?;
        }
        PropertyValue::String(v) => {
            writer.write_u8(tag::STRING)?;
            writer.write_string_value(v, STRING_INLINE, STRING_OFFSET)?;
        }
        _ => return Err(Error::InvalidNode),
    }
    Ok(())
}

fn write_kind<W: Write + Seek>(writer: &mut WzWriter<W>, name: &str) -> Result<()> {
    writer.write_string_value(name, EXTENDED_INLINE, EXTENDED_OFFSET)
}

fn write_extended<W: Write + Seek, S: PayloadSource + ?Sized>(
    writer: &mut WzWriter<W>,
    tree: &Tree,
    id: NodeId,
    source: &mut S,
) -> Result<()> {
    let value = tree
        .get(id)
        .and_then(Node::value)
        .ok_or(Error::InvalidNode)?;

    match value {
        PropertyValue::SubProperty => {
            write_kind(writer, extended::PROPERTY)?;
            write_property_list(writer, tree, id, source)?;
        }
        PropertyValue::Canvas(bitmap) => {
            write_kind(writer, extended::CANVAS)?;
            writer.write_u8(0)?;
            if !tree.children(id).is_empty() {
                writer.write_u8(1)?;
                write_property_list(writer, tree, id, source)?;
            } else {
                writer.write_u8(0)?;
            }
            let data = load_payload(source, &bitmap.data)?;
            writer.write_compressed_int(bitmap.width)?;
            writer.write_compressed_int(bitmap.height)?;
            writer.write_compressed_int(bitmap.format.format)?;
            writer.write_u8(bitmap.format.format2)?;
            writer.write_i32::<LittleEndian>(0)?;
            writer.write_i32::<LittleEndian>(data.len() as i32 + 1)?;
            writer.write_u8(0)?;
            writer.write_all(&data)?;
        }
        PropertyValue::Vector(point) => {
            write_kind(writer, extended::VECTOR)?;
            writer.write_compressed_int(point.x)?;
            writer.write_compressed_int(point.y)?;
        }
        PropertyValue::Convex => {
            write_kind(writer, extended::CONVEX)?;
            let children = tree.children(id);
            writer.write_compressed_int(children.len() as i32)?;
            for child in children {
                write_extended(writer, tree, child, source)?;
            }
        }
        PropertyValue::Sound(sound) => {
            write_kind(writer, extended::SOUND)?;
            writer.write_u8(0)?;
            let data = load_payload(source, &sound.data)?;
            writer.write_compressed_int(data.len() as i32)?;
            writer.write_compressed_int(sound.duration_ms)?;
            writer.write_all(&sound.header)?;
            writer.write_all(&data)?;
        }
        PropertyValue::Uol(path) => {
            write_kind(writer, extended::UOL)?;
            writer.write_u8(0)?;
            writer.write_string_value(path, STRING_INLINE, STRING_OFFSET)?;
        }
        PropertyValue::RawData(payload) => {
            write_kind(writer, extended::RAW_DATA)?;
            writer.write_u8(0)?;
            let data = load_payload(source, payload)?;
            writer.write_compressed_int(data.len() as i32)?;
            writer.write_all(&data)?;
        }
        _ => return Err(Error::InvalidNode),
    }
    Ok(())
}
