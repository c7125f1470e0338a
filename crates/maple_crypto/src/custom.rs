//! Three round byte cipher layered over the keystream cipher in packet payloads

const ROUNDS: usize = 3;

/// Encrypts `data` in place
pub fn encrypt(data: &mut [u8]) {
    let size = data.len();
    for _ in 0..ROUNDS {
        let mut acc = 0u8;
        for j in (1..=size).rev() {
            let index = size - j;
            let step = j as u8;
            let mut c = data[index].rotate_left(3).wrapping_add(step);
            c ^= acc;
            acc = c;
            c = acc.rotate_right(j as u32 % 8);
            c ^= 0xFF;
            data[index] = c.wrapping_add(0x48);
        }

        acc = 0;
        for j in (1..=size).rev() {
            let step = j as u8;
            let mut c = data[j - 1].rotate_left(4).wrapping_add(step);
            c ^= acc;
            acc = c;
            c ^= 0x13;
            data[j - 1] = c.rotate_right(3);
        }
    }
}

/// Decrypts `data` in place, undoing [`encrypt`]
pub fn decrypt(data: &mut [u8]) {
    let size = data.len();
    for _ in 0..ROUNDS {
        let mut prev = 0u8;
        for j in (1..=size).rev() {
            let step = j as u8;
            let chained = data[j - 1].rotate_left(3) ^ 0x13;
            let c = (chained ^ prev).wrapping_sub(step);
            prev = chained;
            data[j - 1] = c.rotate_right(4);
        }

        prev = 0;
        for j in (1..=size).rev() {
            let index = size - j;
            let step = j as u8;
            let chained = (data[index].wrapping_sub(0x48) ^ 0xFF).rotate_left(j as u32 % 8);
            let c = (chained ^ prev).wrapping_sub(step);
            prev = chained;
            data[index] = c.rotate_right(3);
        }
    }
}
