//! MP4 box parsing helpers.

use bytes::Buf;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub size: u64,
    pub box_type: [u8; 4],
    pub header_size: u64,
}

impl BoxHeader {
    /// Printable box type, e.g. `moov`
    pub fn fourcc(&self) -> String {
        fourcc(self.box_type)
    }
}

pub fn fourcc(code: [u8; 4]) -> String {
    code.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

pub fn read_box_header<R: Read>(reader: &mut R) -> Result<BoxHeader, String> {
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|e| format!("Read error: {e}"))?;
    let mut cursor = &header[..];
    let size = cursor.get_u32() as u64;
    let mut box_type = [0u8; 4];
    cursor.copy_to_slice(&mut box_type);

    let (size, header_size) = if size == 1 {
        let ext_size = read_u64(reader)?;
        if ext_size < 16 {
            return Err("Invalid extended box size".to_string());
        }
        (ext_size, 16)
    } else if size == 0 {
        // runs to the end of the enclosing container
        (0, 8)
    } else {
        if size < 8 {
            return Err("Invalid box size".to_string());
        }
        (size, 8)
    };

    Ok(BoxHeader {
        size,
        box_type,
        header_size,
    })
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], String> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("Read error: {e}"))?;
    Ok(buf)
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, String> {
    let buf = read_array::<R, 1>(reader)?;
    Ok((&buf[..]).get_u8())
}

pub fn read_u16<R: Read>(reader: &mut R) -> Result<u16, String> {
    let buf = read_array::<R, 2>(reader)?;
    Ok((&buf[..]).get_u16())
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, String> {
    let buf = read_array::<R, 4>(reader)?;
    Ok((&buf[..]).get_u32())
}

pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32, String> {
    let buf = read_array::<R, 4>(reader)?;
    Ok((&buf[..]).get_i32())
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64, String> {
    let buf = read_array::<R, 8>(reader)?;
    Ok((&buf[..]).get_u64())
}

/// Version byte and 24-bit flags of a full box
pub fn read_full_box_header<R: Read>(reader: &mut R) -> Result<(u8, u32), String> {
    let word = read_u32(reader)?;
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_box_header() {
        let data = b"\x00\x00\x00\x10ftyp";
        let mut cursor = &data[..];
        let header = read_box_header(&mut cursor).expect("header");
        assert_eq!(header.size, 16);
        assert_eq!(header.box_type, *b"ftyp");
        assert_eq!(header.header_size, 8);
        assert_eq!(header.fourcc(), "ftyp");
    }

    #[test]
    fn parses_extended_box_header() {
        let data = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x00\x20";
        let mut cursor = &data[..];
        let header = read_box_header(&mut cursor).expect("header");
        assert_eq!(header.size, 32);
        assert_eq!(header.box_type, *b"mdat");
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn rejects_too_small_box() {
        let data = b"\x00\x00\x00\x07free";
        let mut cursor = &data[..];
        let err = read_box_header(&mut cursor).unwrap_err();
        assert!(err.contains("Invalid box size"));
    }

    #[test]
    fn allows_zero_sized_box() {
        let data = b"\x00\x00\x00\x00mdat";
        let mut cursor = &data[..];
        let header = read_box_header(&mut cursor).expect("header");
        assert_eq!(header.size, 0);
        assert_eq!(header.box_type, *b"mdat");
    }

    #[test]
    fn splits_version_and_flags() {
        let data = b"\x01\x00\x00\x05";
        let mut cursor = &data[..];
        assert_eq!(read_full_box_header(&mut cursor).unwrap(), (1, 5));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let data = b"\x00\x00";
        let mut cursor = &data[..];
        assert!(read_u32(&mut cursor).unwrap_err().contains("Read error"));
    }

    #[test]
    fn non_printable_fourcc_is_masked() {
        assert_eq!(fourcc([b'a', 0, b'c', 0xFF]), "a.c.");
    }
}
