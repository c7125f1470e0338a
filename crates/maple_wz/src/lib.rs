//! This library handles reading, editing and creating **WZ** archives used by *MapleStory*.
//!
//! # WZ Archive Format Documentation
//!
//! A WZ archive is a tree of directories whose leaves are *images*. Each image is a serialized tree of typed
//! properties: numbers, strings, vectors, bitmaps, sounds and links to other properties. WZ files are typically
//! identified with the `.wz` extension.
//!
//! ## File Structure
//!
//! | Offset (bytes)   | Field        | Description                                                      |
//! |------------------|--------------|------------------------------------------------------------------|
//! | 0x0000           | Identifier   | 4 bytes: `PKG1`                                                  |
//! | 0x0004           | Size         | 8 bytes: Number of bytes following the data start                |
//! | 0x000C           | Data start   | 4 bytes: Offset of the version field                             |
//! | 0x0010           | Copyright    | Null terminated string, followed by padding up to the data start |
//! | data start       | Version      | 2 bytes: Digest of the client version hash (missing in newer files) |
//! | data start + 2   | Root         | Entry list of the root directory                                 |
//!
//! ### Directories
//!
//! An entry list is a compressed count followed by entries holding a type, a name, the size and checksum of the
//! entry's data and an obfuscated offset. Offsets are obfuscated with a hash of the client version. Since only a
//! one byte digest of that hash is stored, opening an archive without a known version means searching for it, see
//! [`version`].
//!
//! ### Images
//!
//! Images start with the extended property `Property` and are only parsed when their children are requested.
//! Their properties are described in [`image`].
//!
//! ### Strings
//!
//! Strings are XORed with an incrementing mask and with the archive key, derived from a region IV by
//! [`maple_crypto::WzKey`]. Single byte strings store a negative length, UTF-16 strings a positive one.
//!
//! ## Primitives
//!
//! | Encoding       | Description                                                             |
//! |----------------|-------------------------------------------------------------------------|
//! | Compressed int | `i8`, or `-128` followed by an `i32`                                    |
//! | Compressed long| `i8`, or `-128` followed by an `i64`                                    |
//! | Offset         | `u32` XORed with a value derived from its position and the version hash |
//!
//! ## Additional Information
//!
//! - **File Extension**: `.wz`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Compression**: Bitmaps are zlib streams, optionally split into blocks encrypted with the archive key
//!

pub mod bitmap;
pub mod cursor;
pub mod directory;
pub mod error;
pub mod header;
pub mod image;
pub mod property;
pub mod read;
pub mod search;
pub mod sound;
pub mod tree;
pub mod version;
pub mod write;

pub use bitmap::{Bitmap, Pixels};
pub use maple_crypto::{MapleVersion, WzKey};
pub use property::{Point, PropertyValue};
pub use read::{OpenOptions, WzArchive};
pub use tree::{NodeId, NodeKind};
pub use write::SaveOptions;
