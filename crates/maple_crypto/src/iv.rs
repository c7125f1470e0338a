//! Rolling of 4 byte IVs between packets

use crate::constants::{IV_SEED, SHUFFLE};

fn shuffle(input: u8, state: &mut [u8; 4]) {
    let mut a = state[1];
    let mut b = SHUFFLE[a as usize].wrapping_sub(input);
    state[0] = state[0].wrapping_add(b);

    b = state[2] ^ SHUFFLE[input as usize];
    a = a.wrapping_sub(b);
    state[1] = a;

    a = state[3];
    b = SHUFFLE[a as usize].wrapping_add(input) ^ state[2];
    a = a.wrapping_sub(state[0]);
    state[2] = b;
    state[3] = a.wrapping_add(SHUFFLE[input as usize]);

    *state = u32::from_le_bytes(*state).rotate_left(3).to_le_bytes();
}

/// Derives the IV following `iv`
pub fn next_iv(iv: [u8; 4]) -> [u8; 4] {
    let mut state = IV_SEED;
    for byte in iv {
        shuffle(byte, &mut state);
    }
    state
}

#[cfg(test)]
mod test {
    use super::next_iv;
    use crate::constants::GMS_IV;
    use pretty_assertions::assert_eq;

    #[test]
    fn roll_zero_iv() {
        assert_eq!(next_iv([0, 0, 0, 0]), [0x11, 0xBB, 0x64, 0xC7]);
    }

    #[test]
    fn roll_gms_iv() {
        assert_eq!(next_iv(GMS_IV), [0x93, 0x74, 0xB1, 0x62]);
    }

    #[test]
    fn roll_is_deterministic() {
        let first = next_iv([0x12, 0x34, 0x56, 0x78]);
        assert_eq!(first, next_iv([0x12, 0x34, 0x56, 0x78]));
        assert_ne!(first, next_iv(first));
    }
}
