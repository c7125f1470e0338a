//! Cipher primitives shared by MapleStory archives (`.wz` files) and network packets.
//!
//! # Ciphers
//!
//! | Primitive         | Module            | Description                                                     |
//! |-------------------|-------------------|-----------------------------------------------------------------|
//! | Keystream cipher  | [`stream`]        | AES-256-ECB chained over its own output, XORed onto the payload |
//! | Byte cipher       | [`custom`]        | Three round rotate/add/xor cipher applied to packet payloads    |
//! | IV roller         | [`iv`]            | Table driven derivation of the next 4 byte IV                   |
//! | Archive key       | [`key`]           | 65536 byte keystream used to decrypt archive strings            |
//! | Packet helpers    | [`packet`]        | Packet header encoding and per direction cipher state           |
//!
//! ## Keystream cipher
//!
//! The 4 byte IV is repeated four times to form a 16 byte block. The block is encrypted with AES-256-ECB
//! under [`constants::USER_KEY`] and the result is both the next 16 bytes of keystream and the input of the
//! following encryption. Packet payloads restart the chain every chunk: the first chunk is `0x5B0` bytes
//! long, every later chunk `0x5B4` bytes.
//!
//! ## Archive key
//!
//! Archives are keyed by the keystream chained from a region IV:
//!
//! - **GMS**: `4D 23 C7 2B`
//! - **EMS/MSEA**: `B9 7D 63 E9`
//! - **BMS/Classic**: `00 00 00 00`, producing an all zero key (no string encryption)
//!
//! The functions in this crate have no error path. Buffers are transformed in place.

pub mod constants;
pub mod custom;
pub mod iv;
pub mod key;
pub mod packet;
pub mod stream;

pub use iv::next_iv;
pub use key::{MapleVersion, WzKey, KEY_LEN};
pub use packet::PacketCipher;
pub use stream::StreamCipher;
