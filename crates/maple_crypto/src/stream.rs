//! AES-256 driven keystream cipher
//!
//! The cipher never runs AES in a standard mode. A 16 byte block made from the 4 byte IV repeated four
//! times is encrypted with AES-256-ECB, the output is used as keystream and also as the input of the next
//! encryption. Payloads are processed in chunks (`0x5B0` bytes for the first one, `0x5B4` afterwards) and
//! every chunk restarts the chain from the IV block.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

use crate::constants::USER_KEY;

/// Size of the first chunk of a payload
pub const FIRST_CHUNK_LEN: usize = 0x5B0;

/// Size of every chunk after the first one
pub const CHUNK_LEN: usize = 0x5B4;

/// Repeats a 4 byte IV to fill an AES block
pub fn expand_iv(iv: [u8; 4]) -> [u8; 16] {
    let mut block = [0u8; 16];
    for chunk in block.chunks_exact_mut(4) {
        chunk.copy_from_slice(&iv);
    }
    block
}

/// Keystream generator chaining AES-256-ECB encryptions of its own output
#[derive(Clone)]
pub struct StreamCipher {
    cipher: Aes256,
}

impl Default for StreamCipher {
    fn default() -> Self {
        Self::new(&USER_KEY)
    }
}

impl StreamCipher {
    /// Creates a cipher using a custom AES key
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
        }
    }

    /// Encrypts a single block in place
    pub fn encrypt_block(&self, block: &mut [u8; 16]) {
        let mut inner = Block::clone_from_slice(block);
        self.cipher.encrypt_block(&mut inner);
        block.copy_from_slice(&inner);
    }

    /// Fills `out` with the keystream chained from `iv`, 16 bytes at a time
    ///
    /// A trailing partial block receives the leading bytes of the next keystream block.
    pub fn fill_keystream(&self, iv: [u8; 4], out: &mut [u8]) {
        let mut block = expand_iv(iv);
        for chunk in out.chunks_mut(16) {
            self.encrypt_block(&mut block);
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }

    /// XORs `data` in place with the chunked keystream for `iv`
    ///
    /// The transform is its own inverse.
    pub fn apply(&self, iv: [u8; 4], data: &mut [u8]) {
        let mut start = 0;
        let mut chunk_len = FIRST_CHUNK_LEN;
        while start < data.len() {
            let end = usize::min(start + chunk_len, data.len());
            let mut block = expand_iv(iv);
            for (i, byte) in data[start..end].iter_mut().enumerate() {
                if i % 16 == 0 {
                    self.encrypt_block(&mut block);
                }
                *byte ^= block[i % 16];
            }
            start = end;
            chunk_len = CHUNK_LEN;
        }
    }
}
