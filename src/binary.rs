//! Codec for the `!!binary` scalar tag: base64 with a 76-character line
//! width, matching the convention used by PyYAML/SnakeYAML/libyaml.

use alloc::string::String;
use alloc::vec::Vec;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const LINE_WIDTH: usize = 76;

/// Encode `data` as a `!!binary` scalar body: base64, wrapped at 76
/// characters per line with `\n` separators.
#[must_use]
pub fn encode_binary(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 1);
    for (i, chunk) in encoded.as_bytes().chunks(LINE_WIDTH).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(core::str::from_utf8(chunk).expect("base64 output is ASCII"));
    }
    out
}

/// Decode a `!!binary` scalar body, ignoring embedded line breaks and
/// surrounding whitespace.
pub fn decode_binary(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data = [0u8, 255, 1, 2, 3, 254, 253, 128, 127];
        let encoded = encode_binary(&data);
        let decoded = decode_binary(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn wraps_at_76_columns() {
        let data = vec![0xAB; 200];
        let encoded = encode_binary(&data);
        for line in encoded.split('\n') {
            assert!(line.len() <= LINE_WIDTH);
        }
    }

    #[test]
    fn decode_ignores_embedded_newlines() {
        let decoded = decode_binary("AP8=\n").unwrap();
        assert_eq!(decoded, vec![0, 255]);
    }
}
