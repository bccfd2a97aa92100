// Canonical binary serialization

use std::io::{Cursor, Read};

use crate::{Error, Result};

/// Types with a canonical binary encoding, stable across platforms.
///
/// Writers target a `Vec<u8>` and cannot fail; readers surface
/// `Error::Corrupted` on malformed input.
pub trait Serializable: Sized {
    fn write_to(&self, buf: &mut Vec<u8>);
    fn read_from<R: Read>(reader: &mut R) -> Result<Self>;

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        Self::read_from(&mut cursor)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| Error::Corrupted(e.to_string()))
}

/// Write a variable-length integer (compact size encoding).
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut first = [0u8; 1];
    read_exact(reader, &mut first)?;
    match first[0] {
        0xfd => {
            let mut bytes = [0u8; 2];
            read_exact(reader, &mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            read_exact(reader, &mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            read_exact(reader, &mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
        b => Ok(b as u64),
    }
}

/// Write a byte string with a varint length prefix.
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read a length-prefixed byte string.
pub fn read_var_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_varint(reader)? as usize;
    let mut data = vec![0u8; len];
    read_exact(reader, &mut data)?;
    Ok(data)
}

/// Write a UTF-8 string with a varint length prefix.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_var_bytes(buf, s.as_bytes());
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| Error::Corrupted(e.to_string()))
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    read_exact(reader, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn write_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut bytes = [0u8; 8];
    read_exact(reader, &mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn varint_round_trips() {
        for value in [0u64, 0xfc, 0xfd, 1000, 0xffff, 0x10000, 100_000, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let decoded = read_varint(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn varint_small_is_one_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100);
        assert_eq!(buf, vec![100]);
    }

    #[test]
    fn var_bytes_round_trip() {
        let data = b"hello world";
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, data);
        let decoded = read_var_bytes(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn negative_i64_round_trips() {
        let mut buf = Vec::new();
        write_i64(&mut buf, -1);
        assert_eq!(read_i64(&mut Cursor::new(buf)).unwrap(), -1);
    }

    #[test]
    fn truncated_input_is_corrupted() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, b"hello");
        buf.truncate(3);
        assert!(read_var_bytes(&mut Cursor::new(buf)).is_err());
    }
}
