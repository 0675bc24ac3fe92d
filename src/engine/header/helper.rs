use num_traits::{CheckedAdd, CheckedMul, Num};

use crate::engine::error::{Error, Result};

// Helper to extract null-terminated strings, bytes kept as they are
pub(crate) fn get_str(buf: &[u8]) -> &[u8] {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..nul]
}

// Helper to write a string, null padded when shorter than the field.
// Returns false when the value had to be truncated.
pub(crate) fn put_str(dst: &mut [u8], value: &[u8]) -> bool {
    let len = value.len().min(dst.len());
    dst[..len].copy_from_slice(&value[..len]);
    dst[len..].fill(0);
    len == value.len()
}

/// Encodes `value` as exactly `width` base-8 ASCII digits, left zero padded.
///
/// # Arguments
/// * `value` - Number to encode.
/// * `width` - Number of digits to produce.
///
/// # Returns
/// * `Ok(digits)` - `width` ASCII digits.
/// * `Err(Error::OctalOverflow)` - If the value needs more than `width` digits.
pub fn encode_octal(value: u64, width: usize) -> Result<Vec<u8>> {
    let digits = format!("{:0width$o}", value, width = width);
    if digits.len() > width {
        return Err(Error::OctalOverflow { value, width });
    }
    Ok(digits.into_bytes())
}

/// Decodes a numeric tar field.
///
/// Leading spaces are skipped and the digits end at the first NUL or space,
/// so both NUL and space terminated producers are accepted. An empty field
/// decodes to zero.
///
/// # Arguments
/// * `buf` - The raw field bytes.
///
/// # Returns
/// * `Ok(value)` - The decoded number.
/// * `Err(Error::InvalidOctal)` - On a non octal digit, trailing garbage or overflow.
pub fn decode_octal<T>(buf: &[u8]) -> Result<T>
where
    T: Num + CheckedMul + CheckedAdd + From<u8>,
{
    let invalid = || Error::InvalidOctal(String::from_utf8_lossy(buf).into_owned());
    let start = buf.iter().position(|&b| b != b' ').unwrap_or(buf.len());
    let field = &buf[start..];
    let end = field.iter().position(|&b| b == 0 || b == b' ').unwrap_or(field.len());
    if field[end..].iter().any(|&b| b != 0 && b != b' ') {
        return Err(invalid());
    }

    let eight = T::from(8);
    let mut value = T::zero();
    for &b in &field[..end] {
        if !(b'0'..=b'7').contains(&b) {
            return Err(invalid());
        }
        value = value
            .checked_mul(&eight)
            .and_then(|v| v.checked_add(&T::from(b - b'0')))
            .ok_or_else(invalid)?;
    }
    Ok(value)
}

// Helper to write octal numbers as NUL terminated digits filling the field
pub(crate) fn put_octal(dst: &mut [u8], value: u64) -> Result<()> {
    let width = dst.len() - 1;
    let digits = encode_octal(value, width)?;
    dst[..width].copy_from_slice(&digits);
    dst[width] = b'\0';
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_str_basic() {
        let data = b"hello\0world";
        assert_eq!(b"hello", get_str(data));
    }

    #[test]
    fn test_get_str_no_null() {
        let data = b"abcde";
        assert_eq!(b"abcde", get_str(data));
    }

    #[test]
    fn test_get_str_keeps_raw_bytes() {
        let data = b"caf\xe9\0\0";
        assert_eq!(b"caf\xe9", get_str(data));
    }

    #[test]
    fn test_encode_octal_pads() {
        assert_eq!(b"00000000005".to_vec(), encode_octal(5, 11).unwrap());
        assert_eq!(b"0000644".to_vec(), encode_octal(0o644, 7).unwrap());
        assert_eq!(b"0".to_vec(), encode_octal(0, 1).unwrap());
    }

    #[test]
    fn test_encode_octal_exact_fit() {
        assert_eq!(b"7777777".to_vec(), encode_octal(0o7777777, 7).unwrap());
    }

    #[test]
    fn test_encode_octal_overflow() {
        match encode_octal(0o10000000, 7) {
            Err(Error::OctalOverflow { value, width }) => {
                assert_eq!(0o10000000, value);
                assert_eq!(7, width);
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        // 8 GiB does not fit a size field without extensions
        assert!(encode_octal(8 * 1024 * 1024 * 1024, 11).is_err());
    }

    #[test]
    fn test_decode_octal_nul_terminated() {
        let val: u32 = decode_octal(b"0000644\0").unwrap();
        assert_eq!(val, 0o644);
    }

    #[test]
    fn test_decode_octal_space_terminated() {
        let val: u64 = decode_octal(b"00001234 ").unwrap();
        assert_eq!(val, 0o1234);
        let val: u64 = decode_octal(b"012345\0 ").unwrap();
        assert_eq!(val, 0o12345);
    }

    #[test]
    fn test_decode_octal_leading_spaces() {
        let val: u64 = decode_octal(b"    644 \0").unwrap();
        assert_eq!(val, 0o644);
    }

    #[test]
    fn test_decode_octal_no_terminator() {
        let val: u64 = decode_octal(b"00000000005").unwrap();
        assert_eq!(val, 5);
    }

    #[test]
    fn test_decode_octal_empty() {
        let val: u32 = decode_octal(b"\0\0\0\0").unwrap();
        assert_eq!(val, 0);
        let val: u32 = decode_octal(b"        ").unwrap();
        assert_eq!(val, 0);
    }

    #[test]
    fn test_decode_octal_invalid() {
        let val: Result<u32> = decode_octal(b"notnum\0");
        assert!(val.is_err());
        let val: Result<u32> = decode_octal(b"0009\0");
        assert!(val.is_err());
        let val: Result<u32> = decode_octal(b"12 34\0");
        assert!(val.is_err());
    }

    #[test]
    fn test_decode_octal_overflow() {
        let val: Result<u8> = decode_octal(b"777\0");
        assert!(matches!(val, Err(Error::InvalidOctal(_))));
    }

    #[test]
    fn test_put_str_truncate() {
        let mut buf = [0u8; 4];
        assert!(!put_str(&mut buf, b"abcdef"));
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn test_put_str_clears_tail() {
        let mut buf = [0xffu8; 8];
        assert!(put_str(&mut buf, b"abc"));
        assert_eq!(&buf, b"abc\0\0\0\0\0");
    }

    #[test]
    fn test_put_octal_u64() {
        let mut buf = [0u8; 12];
        put_octal(&mut buf, 0o1234).unwrap();
        assert_eq!(&buf, b"00000001234\0");
    }

    #[test]
    fn test_put_octal_overflow() {
        let mut buf = [0u8; 8];
        assert!(put_octal(&mut buf, 0o77777777).is_err());
    }
}
