//! Packet level helpers built on the keystream cipher and IV roller

use crate::iv::next_iv;
use crate::stream::StreamCipher;

/// Length of the header preceding every encrypted packet
pub const HEADER_LEN: usize = 4;

/// Per direction packet cipher state
#[derive(Clone)]
pub struct PacketCipher {
    cipher: StreamCipher,
    iv: [u8; 4],
    version: i16,
}

impl PacketCipher {
    /// Creates the state for one direction of a session
    pub fn new(iv: [u8; 4], version: i16) -> Self {
        Self {
            cipher: StreamCipher::default(),
            iv,
            version,
        }
    }

    /// Current IV
    pub fn iv(&self) -> [u8; 4] {
        self.iv
    }

    /// Client version the headers are keyed with
    pub fn version(&self) -> i16 {
        self.version
    }

    /// Applies the keystream to `data` and rolls the IV
    pub fn crypt(&mut self, data: &mut [u8]) {
        self.cipher.apply(self.iv, data);
        self.update_iv();
    }

    /// Replaces the IV with the next one in sequence
    pub fn update_iv(&mut self) {
        self.iv = next_iv(self.iv);
    }

    /// Header for a packet of `len` bytes sent to a client
    pub fn header_to_client(&self, len: usize) -> [u8; HEADER_LEN] {
        let iv = (self.iv[3] as i32) << 8 | self.iv[2] as i32;
        let a = iv ^ -(self.version as i32 + 1);
        let b = a ^ len as i32;
        [a as u8, (a >> 8) as u8, b as u8, (b >> 8) as u8]
    }

    /// Header for a packet of `len` bytes sent to a server
    pub fn header_to_server(&self, len: usize) -> [u8; HEADER_LEN] {
        let iv = (self.iv[3] as i32) << 8 | self.iv[2] as i32;
        let a = iv ^ self.version as i32;
        let b = a ^ len as i32;
        [a as u8, (a >> 8) as u8, b as u8, (b >> 8) as u8]
    }

    /// Whether a header received by a server matches this state
    pub fn check_to_server(&self, header: [u8; HEADER_LEN]) -> bool {
        (header[0] ^ self.iv[2]) as i32 == self.version as i32
            && (header[1] ^ self.iv[3]) as i32 == (self.version >> 8) as i32
    }
}

/// Decodes the payload length stored in a packet header
pub fn packet_length(header: [u8; HEADER_LEN]) -> usize {
    let low = u16::from_le_bytes([header[0], header[1]]);
    let high = u16::from_le_bytes([header[2], header[3]]);
    (low ^ high) as usize
}
