//! Archive key material and the client regions selecting it

use std::fmt;
use std::sync::Arc;

use tracing::instrument;

use crate::constants::{EMS_IV, GMS_IV, ZERO_IV};
use crate::stream::StreamCipher;

/// Length of an archive key in bytes
pub const KEY_LEN: usize = 0x10000;

/// Client region, selecting the IV the archive key is derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MapleVersion {
    /// Global clients
    #[default]
    Gms,
    /// European and south east asian clients
    Ems,
    /// Korean and other unencrypted clients
    Bms,
    /// Pre big bang clients with unencrypted archives
    Classic,
    /// Key material supplied by the caller
    Generate,
}

impl MapleVersion {
    /// IV the archive key is derived from
    ///
    /// [`MapleVersion::Generate`] has no table entry and reports the zero IV.
    pub fn iv(self) -> [u8; 4] {
        match self {
            MapleVersion::Gms => GMS_IV,
            MapleVersion::Ems => EMS_IV,
            MapleVersion::Bms | MapleVersion::Classic | MapleVersion::Generate => ZERO_IV,
        }
    }
}

/// Keystream used to decrypt archive strings and keyed bitmaps
///
/// The key is derived once per archive and shared read-only between every image of it.
#[derive(Clone, PartialEq, Eq)]
pub struct WzKey {
    bytes: Arc<[u8]>,
    iv: [u8; 4],
}

impl fmt::Debug for WzKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WzKey({:02X?})", self.iv)
    }
}

impl WzKey {
    /// Derives the key for `iv` with the default AES key
    ///
    /// An all zero IV produces the all zero key used by unencrypted archives.
    #[instrument(level = "debug")]
    pub fn derive(iv: [u8; 4]) -> Self {
        Self::derive_with(&StreamCipher::default(), iv)
    }

    /// Derives the key for `iv` with a custom cipher
    pub fn derive_with(cipher: &StreamCipher, iv: [u8; 4]) -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        if iv != ZERO_IV {
            cipher.fill_keystream(iv, &mut bytes);
        }
        Self {
            bytes: bytes.into(),
            iv,
        }
    }

    /// Derives the key for a client region
    pub fn for_version(version: MapleVersion) -> Self {
        Self::derive(version.iv())
    }

    /// Wraps caller supplied key bytes
    ///
    /// Keys shorter than [`KEY_LEN`] are zero padded, longer keys are truncated.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut key = vec![0u8; KEY_LEN];
        let len = usize::min(bytes.len(), KEY_LEN);
        key[..len].copy_from_slice(&bytes[..len]);
        Self {
            bytes: key.into(),
            iv: ZERO_IV,
        }
    }

    /// IV the key was derived from
    pub fn iv(&self) -> [u8; 4] {
        self.iv
    }

    /// Whether every byte of the key is zero, disabling string encryption
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key byte at `index`, if the key reaches that far
    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Little endian key word used for the UTF-16 string path
    #[inline(always)]
    pub fn word(&self, index: usize) -> Option<u16> {
        Some(u16::from_le_bytes([
            self.get(index * 2)?,
            self.get(index * 2 + 1)?,
        ]))
    }

    /// Number of key bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false, keys are never empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{MapleVersion, WzKey, KEY_LEN};
    use pretty_assertions::{assert_eq, assert_str_eq};
    use proptest::prelude::*;

    #[test]
    fn gms_key_prefix() {
        let key = WzKey::for_version(MapleVersion::Gms);

        assert_str_eq!(
            format!("{:02X?}", &key.as_bytes()[..16]),
            "[96, AE, 3F, A4, 48, FA, DD, 90, 46, 76, 05, 61, 97, CE, 78, 68]"
        );
        assert_str_eq!(
            format!("{:02X?}", &key.as_bytes()[KEY_LEN - 16..]),
            "[63, E4, 87, 4E, F8, 8B, 81, 39, CC, 75, 49, 8C, F2, 94, 96, E4]"
        );
    }

    #[test]
    fn ems_key_prefix() {
        let key = WzKey::for_version(MapleVersion::Ems);

        assert_str_eq!(
            format!("{:02X?}", &key.as_bytes()[..16]),
            "[AB, 65, 49, 05, 67, CD, 57, 0A, 98, 7B, 87, 0A, EC, 65, 07, 8B]"
        );
    }

    #[test]
    fn unencrypted_regions_use_zero_key() {
        for version in [MapleVersion::Bms, MapleVersion::Classic] {
            let key = WzKey::for_version(version);
            assert_eq!(key.len(), KEY_LEN);
            assert!(key.is_zero());
        }
    }

    #[test]
    fn word_reads_little_endian() {
        let key = WzKey::from_bytes(&[0x34, 0x12, 0x78, 0x56]);
        assert_eq!(key.word(0), Some(0x1234));
        assert_eq!(key.word(1), Some(0x5678));
        assert_eq!(key.word(KEY_LEN / 2), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn derived_key_is_deterministic(iv in any::<[u8; 4]>().prop_filter("non zero", |iv| *iv != [0; 4])) {
            let first = WzKey::derive(iv);
            prop_assert_eq!(first.len(), KEY_LEN);
            prop_assert_eq!(first, WzKey::derive(iv));
        }
    }
}
