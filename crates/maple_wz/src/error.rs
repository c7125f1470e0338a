//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent warpper for [`regex::Error`]
    #[error(transparent)]
    InvalidPattern(#[from] regex::Error),

    /// header does not describe this stream
    #[error("malformed archive header: {0}")]
    #[diagnostic(help("the file is truncated or is not a wz archive"))]
    MalformedHeader(String),

    /// no client version reproduces a readable directory tree
    #[error("unable to determine the archive version")]
    #[diagnostic(help("pass the client version explicitly or try another region"))]
    VersionNotFound,

    /// property type tag {tag:#04X} at {offset:#X}
    #[error("unknown property type {tag:#04X} at offset {offset:#X}")]
    UnknownPropertyType {
        /// Tag read from the stream
        tag: u8,
        /// Position of the tag
        offset: u64,
    },

    /// extended property {name} at {offset:#X}
    #[error("unknown extended property {name:?} at offset {offset:#X}")]
    UnknownExtendedName {
        /// Name read from the stream
        name: String,
        /// Position of the property
        offset: u64,
    },

    /// directory entry type {tag:#04X} at {offset:#X}
    #[error("unknown directory entry type {tag:#04X} at offset {offset:#X}")]
    UnknownDirectoryEntry {
        /// Tag read from the stream
        tag: u8,
        /// Position of the tag
        offset: u64,
    },

    /// string block tag {tag:#04X} at {offset:#X}
    #[error("unknown string block tag {tag:#04X} at offset {offset:#X}")]
    UnknownStringTag {
        /// Tag read from the stream
        tag: u8,
        /// Position of the tag
        offset: u64,
    },

    /// entry count {count} at {offset:#X} cannot fit in the stream
    #[error("entry count {count} at offset {offset:#X} exceeds the stream")]
    InvalidEntryCount {
        /// Count read from the stream
        count: i32,
        /// Position of the count
        offset: u64,
    },

    /// image at {offset:#X} lacks its property marker
    #[error("image at offset {offset:#X} does not start with a property list")]
    InvalidImage {
        /// Offset of the image
        offset: u64,
    },

    /// name unusable as a file name, usually a sign of a wrong key or version
    #[error("invalid node name {0:?}")]
    InvalidNodeName(String),

    /// directories nest deeper than allowed or loop back on themselves
    #[error("directory at offset {0:#X} is nested too deeply or revisited")]
    DirectoryLoop(u64),

    /// bitmap format {0}
    #[error("unsupported bitmap format {0}")]
    UnsupportedBitmapFormat(i32),

    /// {0}
    #[error("invalid bitmap data: {0}")]
    InvalidBitmapData(String),

    /// string length {0} exceeds the stream or the key
    #[error("string length {0} exceeds the stream or the key")]
    StringTooLong(usize),

    /// a sibling named {0} already exists
    #[error("a sibling named {0:?} already exists")]
    DuplicateName(String),

    /// node handle is stale or refers to the wrong kind of node
    #[error("node handle is stale or of the wrong kind")]
    InvalidNode,

    /// image was disposed and can no longer be parsed
    #[error("image {0:?} was disposed")]
    ImageDisposed(String),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
