//! Client version discovery
//!
//! Offsets are obfuscated with a hash of the client version, but archives only store a one byte digest of
//! that hash. Unless the caller knows the version, every candidate whose digest matches is tried until one
//! decodes a plausible directory tree.
//!
//! A tree is plausible when the first image it lists starts with an extended property marker, or, for trees
//! without any image, when reading the directories ended exactly at the end of the stream. This is a heuristic:
//! a wrong hash may pass it, so the first passing candidate wins.

use std::io::{Read, Seek};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{info, instrument, trace, warn};

use crate::cursor::{WzReader, EXTENDED_INLINE, EXTENDED_OFFSET};
use crate::directory::parse_directory;
use crate::error::{Error, Result};
use crate::tree::{Node, Tree};

/// End of the searched client versions, exclusive
pub const MAX_VERSION: u16 = i16::MAX as u16;

/// First version searched for archives without a version field
pub const HEADERLESS_FIRST_VERSION: u16 = 777;

/// Marker of a classic version field that may also be the start of a headerless directory
const AMBIGUOUS_FIELD: u16 = 0x80;

/// Hash of a client version, used to obfuscate offsets
pub fn version_hash(version: u16) -> u32 {
    version
        .to_string()
        .bytes()
        .fold(0u32, |hash, digit| hash.wrapping_mul(32).wrapping_add(digit as u32 + 1))
}

/// Digest of a version hash stored in the version field
pub fn encrypted_version(hash: u32) -> u16 {
    let [a, b, c, d] = hash.to_be_bytes();
    (0xFF ^ a ^ b ^ c ^ d) as u16
}

/// Where the root directory starts and what the version field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLayout {
    /// Digest stored right after the header, directories follow it
    Classic {
        /// Stored digest
        declared: u16,
    },
    /// No version field, directories start at the data start
    Headerless,
}

impl VersionLayout {
    /// Offset of the root directory
    pub fn directory_start(self, data_start: u32) -> u64 {
        match self {
            VersionLayout::Classic { .. } => data_start as u64 + 2,
            VersionLayout::Headerless => data_start as u64,
        }
    }

    /// Versions worth trying, in search order
    pub fn candidates(self) -> impl Iterator<Item = (u16, u32)> {
        let (first, declared) = match self {
            VersionLayout::Classic { declared } => (0, Some(declared)),
            VersionLayout::Headerless => (HEADERLESS_FIRST_VERSION, None),
        };
        (first..MAX_VERSION)
            .map(|version| (version, version_hash(version)))
            .filter(move |&(_, hash)| hash != 0 && declared.map_or(true, |d| encrypted_version(hash) == d))
    }
}

/// Inspects the bytes at the data start to tell both layouts apart
pub fn detect_layout<R: Read + Seek>(reader: &mut WzReader<R>) -> Result<VersionLayout> {
    let data_start = reader.data_start() as u64;
    reader.seek_to(data_start)?;
    let field = reader.read_u16::<LittleEndian>()?;

    let headerless = match field {
        0x100.. => true,
        AMBIGUOUS_FIELD => {
            reader.seek_to(data_start)?;
            let count = reader.read_compressed_int()?;
            count > 0 && count % 0x100 == 0 && count <= 0xFFFF
        }
        _ => false,
    };

    Ok(if headerless {
        VersionLayout::Headerless
    } else {
        VersionLayout::Classic { declared: field }
    })
}

/// Version, hash and directory tree an archive was decoded with
#[derive(Debug)]
pub struct Resolved {
    /// Client version
    pub version: u16,
    /// Hash of the client version
    pub hash: u32,
    /// Directories and unparsed images
    pub tree: Tree,
}

/// Decodes the directories with a known client version
#[instrument(skip(reader), err)]
pub fn parse_with_version<R: Read + Seek>(
    reader: &mut WzReader<R>,
    name: &str,
    layout: VersionLayout,
    version: u16,
) -> Result<Resolved> {
    let hash = version_hash(version);
    if let VersionLayout::Classic { declared } = layout {
        if encrypted_version(hash) != declared {
            warn!(
                "version {version} digests to {}, the archive declares {declared}",
                encrypted_version(hash)
            );
        }
    }

    reader.set_hash(hash);
    reader.seek_to(layout.directory_start(reader.data_start()))?;
    let mut tree = Tree::new(name);
    let root = tree.root();
    parse_directory(reader, &mut tree, root)?;
    Ok(Resolved { version, hash, tree })
}

/// Searches for the client version whose hash decodes a plausible directory tree
#[instrument(skip(reader), err)]
pub fn resolve<R: Read + Seek>(reader: &mut WzReader<R>, name: &str, layout: VersionLayout) -> Result<Resolved> {
    for (version, hash) in layout.candidates() {
        match trial(reader, name, layout, hash) {
            Ok(Some(tree)) => {
                info!(version, hash, "resolved archive version");
                return Ok(Resolved { version, hash, tree });
            }
            Ok(None) => trace!(version, "candidate decoded an implausible tree"),
            Err(e) => trace!(version, "candidate failed: {e}"),
        }
    }
    Err(Error::VersionNotFound)
}

fn trial<R: Read + Seek>(
    reader: &mut WzReader<R>,
    name: &str,
    layout: VersionLayout,
    hash: u32,
) -> Result<Option<Tree>> {
    reader.set_hash(hash);
    reader.seek_to(layout.directory_start(reader.data_start()))?;
    let mut tree = Tree::new(name);
    let root = tree.root();
    parse_directory(reader, &mut tree, root)?;
    let end = reader.position()?;

    let first_image = tree
        .descendants(tree.root())
        .into_iter()
        .filter_map(|id| tree.get(id).and_then(Node::as_image))
        .find_map(|image| image.offset());

    let plausible = match first_image {
        Some(offset) => {
            reader.seek_to(offset)?;
            matches!(reader.read_u8()?, EXTENDED_INLINE | EXTENDED_OFFSET)
        }
        None => end == reader.len(),
    };
    Ok(plausible.then_some(tree))
}
