//! Variable-byte integers: 7 data bits per byte, high bit set while more
//! bytes follow

use crate::error::{LucentError, Result};

pub fn encode_vint(value: u32, output: &mut Vec<u8>) {
    encode_vlong(value as u64, output)
}

pub fn encode_vlong(mut value: u64, output: &mut Vec<u8>) {
    while value >= 0x80 {
        output.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    output.push(value as u8);
}

/// Decode a u32 at `*pos`, advancing it
pub fn decode_vint(input: &[u8], pos: &mut usize) -> Result<u32> {
    let value = decode_vlong(input, pos)?;
    u32::try_from(value).map_err(|_| LucentError::corrupt("varint", "value exceeds 32 bits"))
}

/// Decode a u64 at `*pos`, advancing it
pub fn decode_vlong(input: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let byte = *input.get(*pos).ok_or(LucentError::Underflow {
            position: *pos,
            needed: 1,
            limit: input.len(),
        })?;
        *pos += 1;

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 63 {
            return Err(LucentError::corrupt("varint", "encoding longer than 10 bytes"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_encoding() {
        let mut output = Vec::new();

        encode_vint(0, &mut output);
        encode_vint(127, &mut output);
        encode_vint(128, &mut output);
        encode_vint(16383, &mut output);
        encode_vint(u32::MAX, &mut output);

        let mut pos = 0;
        assert_eq!(decode_vint(&output, &mut pos).unwrap(), 0);
        assert_eq!(decode_vint(&output, &mut pos).unwrap(), 127);
        assert_eq!(decode_vint(&output, &mut pos).unwrap(), 128);
        assert_eq!(decode_vint(&output, &mut pos).unwrap(), 16383);
        assert_eq!(decode_vint(&output, &mut pos).unwrap(), u32::MAX);
        assert_eq!(pos, output.len());
    }

    #[test]
    fn test_continuation_bit_layout() {
        let mut output = Vec::new();
        encode_vint(300, &mut output);
        assert_eq!(output, vec![0xAC, 0x02]);

        output.clear();
        encode_vlong(u64::MAX, &mut output);
        assert_eq!(output.len(), 10);
    }

    #[test]
    fn test_truncated_input_underflows() {
        let mut pos = 0;
        assert!(matches!(
            decode_vlong(&[0x80, 0x80], &mut pos),
            Err(LucentError::Underflow { .. })
        ));
    }

    #[test]
    fn test_vint_rejects_wide_values() {
        let mut output = Vec::new();
        encode_vlong(u32::MAX as u64 + 1, &mut output);
        let mut pos = 0;
        assert!(decode_vint(&output, &mut pos).is_err());

        let mut pos = 0;
        assert_eq!(decode_vlong(&output, &mut pos).unwrap(), u32::MAX as u64 + 1);
    }
}
