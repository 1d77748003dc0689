//! Standard-alphabet base64 with `=` padding. Kept dependency-free on purpose:
//! the payloads here are single JPEG buffers and the transform is trivial.

use thiserror::Error;

const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Base64Error {
    #[error("input length {0} is not a multiple of 4")]
    InvalidLength(usize),
    #[error("invalid base64 byte {0:#04x}")]
    InvalidByte(u8),
    #[error("padding in a position other than the end")]
    MisplacedPadding,
}

/// Encodes `input` to base64. Output length is exactly `4 * ceil(n / 3)`.
pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let group = (b0 << 16) | (b1 << 8) | b2;

        out.push(ALPHABET[(group >> 18) as usize & 0x3f] as char);
        out.push(ALPHABET[(group >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(group >> 6) as usize & 0x3f] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[group as usize & 0x3f] as char
        } else {
            '='
        });
    }
    out
}

fn decode_byte(b: u8) -> Result<u32, Base64Error> {
    match b {
        b'A'..=b'Z' => Ok((b - b'A') as u32),
        b'a'..=b'z' => Ok((b - b'a') as u32 + 26),
        b'0'..=b'9' => Ok((b - b'0') as u32 + 52),
        b'+' => Ok(62),
        b'/' => Ok(63),
        other => Err(Base64Error::InvalidByte(other)),
    }
}

/// Decodes standard base64 with padding.
pub fn decode(input: &str) -> Result<Vec<u8>, Base64Error> {
    let bytes = input.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Base64Error::InvalidLength(bytes.len()));
    }
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    for (i, quad) in bytes.chunks(4).enumerate() {
        let last = i == bytes.len() / 4 - 1;
        let pad = quad.iter().rev().take_while(|&&b| b == b'=').count();
        if pad > 2 || (pad > 0 && !last) {
            return Err(Base64Error::MisplacedPadding);
        }
        if quad[..4 - pad].contains(&b'=') {
            return Err(Base64Error::MisplacedPadding);
        }

        let mut group = 0u32;
        for &b in &quad[..4 - pad] {
            group = (group << 6) | decode_byte(b)?;
        }
        group <<= 6 * pad as u32;

        out.push((group >> 16) as u8);
        if pad < 2 {
            out.push((group >> 8) as u8);
        }
        if pad == 0 {
            out.push(group as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "Zg==");
        assert_eq!(encode(b"fo"), "Zm8=");
        assert_eq!(encode(b"foo"), "Zm9v");
        assert_eq!(encode(b"foob"), "Zm9vYg==");
        assert_eq!(encode(b"fooba"), "Zm9vYmE=");
        assert_eq!(encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn output_length_is_four_ceil_n_over_three() {
        for n in 0..256usize {
            let input = vec![0xa5u8; n];
            assert_eq!(encode(&input).len(), n.div_ceil(3) * 4, "n = {n}");
        }
    }

    #[test]
    fn round_trips_all_short_lengths() {
        for n in 0..64usize {
            let input: Vec<u8> = (0..n).map(|i| (i * 37 + 11) as u8).collect();
            assert_eq!(decode(&encode(&input)).unwrap(), input, "n = {n}");
        }
    }

    #[test]
    fn round_trips_multi_block_binary() {
        let input: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        assert_eq!(decode(&encode(&input)).unwrap(), input);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode("Zg="), Err(Base64Error::InvalidLength(3)));
        assert_eq!(decode("Zg!="), Err(Base64Error::InvalidByte(b'!')));
        assert_eq!(decode("Z==="), Err(Base64Error::MisplacedPadding));
        assert_eq!(decode("Zg==Zg=="), Err(Base64Error::MisplacedPadding));
    }
}
