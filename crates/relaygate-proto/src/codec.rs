//! Little-endian length-prefixed field helpers.
//!
//! Readers take `&mut &[u8]` and advance it past what they consume. Every
//! read checks the remaining length first, so truncated input surfaces as
//! [`ProtocolError::UnexpectedEof`] instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

fn ensure(src: &[u8], needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(ProtocolError::eof(needed, src.len()));
    }
    Ok(())
}

/// Read one byte.
pub fn get_u8(src: &mut &[u8]) -> Result<u8> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a little-endian u16.
pub fn get_u16(src: &mut &[u8]) -> Result<u16> {
    ensure(src, 2)?;
    Ok(src.get_u16_le())
}

/// Read a little-endian u32.
pub fn get_u32(src: &mut &[u8]) -> Result<u32> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

fn take(src: &mut &[u8], len: usize) -> Result<Bytes> {
    ensure(src, len)?;
    let out = Bytes::copy_from_slice(&src[..len]);
    src.advance(len);
    Ok(out)
}

/// Read a u32-length-prefixed byte string.
pub fn get_bytes(src: &mut &[u8]) -> Result<Bytes> {
    let len = get_u32(src)? as usize;
    take(src, len)
}

/// Read a u16-length-prefixed byte string.
pub fn get_short_bytes(src: &mut &[u8]) -> Result<Bytes> {
    let len = get_u16(src)? as usize;
    take(src, len)
}

/// Read a u32-length-prefixed UTF-8 string.
pub fn get_string(src: &mut &[u8]) -> Result<String> {
    Ok(String::from_utf8(get_bytes(src)?.to_vec())?)
}

/// Read a u16-length-prefixed UTF-8 string.
pub fn get_short_string(src: &mut &[u8]) -> Result<String> {
    Ok(String::from_utf8(get_short_bytes(src)?.to_vec())?)
}

/// Write a u32-length-prefixed byte string.
pub fn put_bytes(dst: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| ProtocolError::FieldTooLong { len: data.len(), max: u32::MAX as usize })?;
    dst.reserve(4 + data.len());
    dst.put_u32_le(len);
    dst.put_slice(data);
    Ok(())
}

/// Write a u16-length-prefixed byte string.
pub fn put_short_bytes(dst: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| ProtocolError::FieldTooLong { len: data.len(), max: u16::MAX as usize })?;
    dst.reserve(2 + data.len());
    dst.put_u16_le(len);
    dst.put_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_bytes_prefix() {
        let mut buf = BytesMut::new();
        put_short_bytes(&mut buf, b"gate").unwrap();
        assert_eq!(&buf[..], &[4, 0, b'g', b'a', b't', b'e']);

        let mut src = &buf[..];
        assert_eq!(get_short_string(&mut src).unwrap(), "gate");
        assert!(src.is_empty());
    }

    #[test]
    fn truncated_field_is_eof() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"0123456789").unwrap();
        let mut src = &buf[..8];
        assert!(matches!(
            get_bytes(&mut src),
            Err(ProtocolError::UnexpectedEof { needed: 10, available: 4 })
        ));
    }

    #[test]
    fn short_field_too_long() {
        let data = vec![0u8; usize::from(u16::MAX) + 1];
        let mut buf = BytesMut::new();
        assert!(matches!(put_short_bytes(&mut buf, &data), Err(ProtocolError::FieldTooLong { .. })));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut buf = BytesMut::new();
        put_short_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        let mut src = &buf[..];
        assert!(matches!(get_short_string(&mut src), Err(ProtocolError::InvalidUtf8(_))));
    }
}
