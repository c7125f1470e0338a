//! Directory entry lists
//!
//! A directory is a compressed entry count followed by its entries:
//!
//! | Field    | Encoding                                                  |
//! |----------|-----------------------------------------------------------|
//! | type     | `u8`, see the `ENTRY_*` constants                         |
//! | name     | string, or an `i32` pointing at a type and name pair      |
//! | size     | compressed `i32`                                          |
//! | checksum | compressed `i32`                                          |
//! | offset   | obfuscated `u32`                                          |
//!
//! Back references of type [`ENTRY_REFERENCE`] are relative to the data start.

use std::collections::HashSet;
use std::io::{Read, Seek, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{instrument, warn};

use crate::cursor::{compressed_int_len, encoded_string_len, is_cacheable, WzReader, WzWriter};
use crate::error::{Error, Result};
use crate::tree::{Directory, Image, Node, NodeId, NodeKind, Tree};

/// Entry without a name that is skipped
pub const ENTRY_SKIP: u8 = 1;
/// Entry whose type and name live at an earlier offset
pub const ENTRY_REFERENCE: u8 = 2;
/// Subdirectory entry
pub const ENTRY_DIRECTORY: u8 = 3;
/// Image entry
pub const ENTRY_IMAGE: u8 = 4;

/// Directories nested deeper than this are rejected
pub const MAX_DEPTH: usize = 64;

/// Smallest number of bytes an entry occupies
const MIN_ENTRY_LEN: u64 = 8;

/// Entry of a directory list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// [`ENTRY_DIRECTORY`] or [`ENTRY_IMAGE`]
    pub kind: u8,
    /// Name, trimmed
    pub name: String,
    /// Size of the entry's data
    pub size: i32,
    /// Checksum of the entry's data
    pub checksum: i32,
    /// Absolute offset of the entry's data
    pub offset: u32,
}

/// Checks that `name` could be used as a file name
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |c: char| matches!(c, '"' | '<' | '>' | '|' | ':' | '*' | '?' | '\\' | '/') || (c as u32) < 32;
    if name.chars().any(invalid) {
        return Err(Error::InvalidNodeName(name.to_owned()));
    }
    Ok(())
}

/// Reads the entry list at the current position
pub fn read_entries<R: Read + Seek>(reader: &mut WzReader<R>) -> Result<Vec<DirectoryEntry>> {
    let offset = reader.position()?;
    let count = reader.read_compressed_int()?;
    if count < 0 || count as u64 * MIN_ENTRY_LEN > reader.remaining()? {
        return Err(Error::InvalidEntryCount { count, offset });
    }

    let mut entries = Vec::new();
    for _ in 0..count {
        let tag_offset = reader.position()?;
        let mut kind = reader.read_u8()?;
        let name = match kind {
            ENTRY_SKIP => {
                reader.read_i32::<LittleEndian>()?;
                reader.read_i16::<LittleEndian>()?;
                reader.read_offset()?;
                continue;
            }
            ENTRY_REFERENCE => {
                let relative = reader.read_i32::<LittleEndian>()?;
                let resume = reader.position()?;
                let target = (reader.data_start() as u64).wrapping_add_signed(relative as i64);
                reader.seek_to(target)?;
                kind = reader.read_u8()?;
                let name = reader.read_wz_string()?;
                reader.seek_to(resume)?;
                name
            }
            ENTRY_DIRECTORY | ENTRY_IMAGE => reader.read_wz_string()?,
            tag => {
                return Err(Error::UnknownDirectoryEntry {
                    tag,
                    offset: tag_offset,
                })
            }
        };
        if !matches!(kind, ENTRY_DIRECTORY | ENTRY_IMAGE) {
            return Err(Error::UnknownDirectoryEntry {
                tag: kind,
                offset: tag_offset,
            });
        }

        let name = name.trim().to_owned();
        validate_name(&name)?;
        let size = reader.read_compressed_int()?;
        let checksum = reader.read_compressed_int()?;
        let offset = reader.read_offset()?;
        entries.push(DirectoryEntry {
            kind,
            name,
            size,
            checksum,
            offset,
        });
    }
    Ok(entries)
}

/// Reads the directory at the current position into `dir`, descending into every subdirectory
#[instrument(skip(reader, tree))]
pub fn parse_directory<R: Read + Seek>(
    reader: &mut WzReader<R>,
    tree: &mut Tree,
    dir: NodeId,
) -> Result<()> {
    let mut visited = HashSet::new();
    let start = reader.position()?;
    visited.insert(start);
    parse_level(reader, tree, dir, &mut visited, 0)
}

fn parse_level<R: Read + Seek>(
    reader: &mut WzReader<R>,
    tree: &mut Tree,
    dir: NodeId,
    visited: &mut HashSet<u64>,
    depth: usize,
) -> Result<()> {
    let mut subdirs = Vec::new();
    for entry in read_entries(reader)? {
        let kind = if entry.kind == ENTRY_DIRECTORY {
            NodeKind::Directory(Directory {
                size: entry.size,
                checksum: entry.checksum,
                offset: entry.offset,
            })
        } else {
            NodeKind::Image(Image::stored(entry.offset as u64, entry.size, entry.checksum))
        };

        match tree.insert(dir, Node::new(entry.name, kind)) {
            Ok(id) if entry.kind == ENTRY_DIRECTORY => subdirs.push((id, entry.offset as u64)),
            Ok(_) => {}
            Err(Error::DuplicateName(name)) => warn!("skipping duplicate directory entry {name:?}"),
            Err(e) => return Err(e),
        }
    }

    for (id, offset) in subdirs {
        if depth + 1 > MAX_DEPTH || !visited.insert(offset) {
            return Err(Error::DirectoryLoop(offset));
        }
        reader.seek_to(offset)?;
        parse_level(reader, tree, id, visited, depth + 1)?;
    }
    Ok(())
}

/// Number of bytes the type and name of an entry take, given the entries written before it
///
/// `seen` collects the type and name pairs already written, mirroring the cache of [`WzWriter`].
pub fn entry_name_len(kind: u8, name: &str, seen: &mut HashSet<(u8, String)>) -> usize {
    let key = (kind, name.to_owned());
    if is_cacheable(name) && seen.contains(&key) {
        return 5;
    }
    seen.insert(key);
    1 + encoded_string_len(name)
}

/// Number of bytes an entry takes after its type and name
pub fn entry_tail_len(size: i32, checksum: i32) -> usize {
    compressed_int_len(size) + compressed_int_len(checksum) + 4
}

/// Writes an entry list, a single zero byte when empty
pub fn write_entries<W: Write + Seek>(writer: &mut WzWriter<W>, entries: &[DirectoryEntry]) -> Result<()> {
    if entries.is_empty() {
        writer.write_u8(0)?;
        return Ok(());
    }

    writer.write_compressed_int(entries.len() as i32)?;
    for entry in entries {
        writer.write_object_value(&entry.name, entry.kind)?;
        writer.write_compressed_int(entry.size)?;
        writer.write_compressed_int(entry.checksum)?;
        writer.write_offset(entry.offset)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use maple_crypto::{MapleVersion, WzKey};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;

    const HASH: u32 = 0x754;
    const DATA_START: u32 = 60;

    fn entry(kind: u8, name: &str, offset: u32) -> DirectoryEntry {
        DirectoryEntry {
            kind,
            name: name.to_owned(),
            size: 0x40,
            checksum: -3,
            offset,
        }
    }

    /// Pads the stream to the data start and the version field, then writes `lists` back to back
    fn encode(key: &WzKey, lists: &[&[DirectoryEntry]]) -> Result<Vec<u8>> {
        let mut writer = WzWriter::new(Cursor::new(Vec::new()), key.clone(), HASH, DATA_START);
        writer.write_all(&[0u8; DATA_START as usize + 2])?;
        for list in lists {
            write_entries(&mut writer, list)?;
        }
        writer.write_all(&[0u8; 64])?;
        Ok(writer.into_inner().into_inner())
    }

    fn reader(bytes: Vec<u8>, key: &WzKey) -> Result<WzReader<Cursor<Vec<u8>>>> {
        let mut reader = WzReader::new(Cursor::new(bytes), key.clone())?;
        reader.set_hash(HASH);
        reader.set_data_start(DATA_START);
        reader.seek_to(DATA_START as u64 + 2)?;
        Ok(reader)
    }

    #[test]
    fn entries_survive_name_references() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Gms);
        let entries = vec![
            entry(ENTRY_IMAGE, "0100100.img", 0x400),
            entry(ENTRY_DIRECTORY, "Character", 0x200),
            entry(ENTRY_IMAGE, "0100100.img", 0x500),
        ];
        let mut r = reader(encode(&key, &[&entries])?, &key)?;
        assert_eq!(read_entries(&mut r)?, entries);
        Ok(())
    }

    #[test]
    fn planned_name_lengths_match_output() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Ems);
        let entries = vec![
            entry(ENTRY_IMAGE, "Weapon.img", 0x400),
            entry(ENTRY_DIRECTORY, "Weapon.img", 0x200),
            entry(ENTRY_IMAGE, "Weapon.img", 0x500),
            entry(ENTRY_IMAGE, "a", 0x600),
            entry(ENTRY_IMAGE, "a", 0x600),
        ];

        let mut seen = HashSet::new();
        let planned: usize = 1 + entries
            .iter()
            .map(|e| entry_name_len(e.kind, &e.name, &mut seen) + entry_tail_len(e.size, e.checksum))
            .sum::<usize>();

        let mut writer = WzWriter::new(Cursor::new(Vec::new()), key, HASH, DATA_START);
        write_entries(&mut writer, &entries)?;
        assert_eq!(writer.get_ref().get_ref().len(), planned);
        Ok(())
    }

    #[test]
    fn skip_entries_are_ignored() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Bms);
        let mut writer = WzWriter::new(Cursor::new(Vec::new()), key.clone(), HASH, DATA_START);
        writer.write_all(&[0u8; DATA_START as usize + 2])?;
        writer.write_compressed_int(2)?;
        writer.write_u8(ENTRY_SKIP)?;
        writer.write_all(&[0u8; 6])?;
        writer.write_offset(0)?;
        writer.write_object_value("Map", ENTRY_DIRECTORY)?;
        writer.write_compressed_int(1)?;
        writer.write_compressed_int(2)?;
        writer.write_offset(0x99)?;

        let mut r = reader(writer.into_inner().into_inner(), &key)?;
        let entries = read_entries(&mut r)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Map");
        assert_eq!(entries[0].offset, 0x99);
        Ok(())
    }

    #[test]
    fn unknown_entry_type_fails() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Bms);
        let mut bytes = vec![0u8; DATA_START as usize + 2];
        bytes.extend_from_slice(&[1, 7]);
        bytes.extend_from_slice(&[0u8; 16]);

        let mut r = reader(bytes, &key)?;
        assert!(matches!(
            read_entries(&mut r),
            Err(Error::UnknownDirectoryEntry { tag: 7, .. })
        ));
        Ok(())
    }

    #[test]
    fn huge_entry_count_fails() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Bms);
        let mut writer = WzWriter::new(Cursor::new(Vec::new()), key.clone(), HASH, DATA_START);
        writer.write_all(&[0u8; DATA_START as usize + 2])?;
        writer.write_compressed_int(i32::MAX)?;

        let mut r = reader(writer.into_inner().into_inner(), &key)?;
        assert!(matches!(read_entries(&mut r), Err(Error::InvalidEntryCount { .. })));
        Ok(())
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name("Mob.img").is_ok());
        assert!(validate_name("메이플").is_ok());
        assert!(matches!(validate_name("a/b"), Err(Error::InvalidNodeName(_))));
        assert!(matches!(validate_name("a\u{1}"), Err(Error::InvalidNodeName(_))));
    }

    #[test]
    #[traced_test]
    fn nested_directories_are_parsed() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Gms);
        let root_start = DATA_START + 2;

        // root: one image and one directory, the directory holds a single image
        let mut seen = HashSet::new();
        let root_entries_len = 1
            + entry_name_len(ENTRY_IMAGE, "a.img", &mut seen)
            + entry_tail_len(0x40, -3)
            + entry_name_len(ENTRY_DIRECTORY, "Sub", &mut seen)
            + entry_tail_len(0x40, -3);
        let sub_start = root_start + root_entries_len as u32;

        let root = [entry(ENTRY_IMAGE, "a.img", 0x300), entry(ENTRY_DIRECTORY, "Sub", sub_start)];
        let sub = [entry(ENTRY_IMAGE, "b.img", 0x340)];
        let mut r = reader(encode(&key, &[&root, &sub])?, &key)?;

        let mut tree = Tree::new("Test.wz");

        let root = tree.root();
        parse_directory(&mut r, &mut tree, root)?;

        let sub_id = tree.child(tree.root(), "Sub").ok_or(Error::InvalidNode)?;
        let b = tree.child(sub_id, "b.img").ok_or(Error::InvalidNode)?;
        assert_eq!(tree.path(b).as_deref(), Some("Test.wz/Sub/b.img"));
        assert_eq!(
            tree.get(b).and_then(Node::as_image).and_then(Image::offset),
            Some(0x340)
        );
        Ok(())
    }

    #[test]
    fn self_referencing_directory_is_a_loop() -> Result<()> {
        let key = WzKey::for_version(MapleVersion::Gms);
        let root = [entry(ENTRY_DIRECTORY, "Loop", DATA_START + 2)];
        let mut r = reader(encode(&key, &[&root])?, &key)?;

        let mut tree = Tree::new("Test.wz");

        let root = tree.root();
        assert!(matches!(
            parse_directory(&mut r, &mut tree, root),
            Err(Error::DirectoryLoop(_))
        ));
        Ok(())
    }
}
