// =============================================================================
// QMesh Distributed QPU - Wire Framing
// =============================================================================
// Table of Contents:
//   1. Frame limits
//   2. write_frame / read_frame
// =============================================================================
// Purpose: Length-prefixed message framing for the classical channel. Each
//          message is a u32 big-endian length followed by the payload; the
//          reader hands complete messages upward and assumes nothing about
//          their content.
// =============================================================================

use std::io::{Read, Write};

// =============================================================================
// 1. Frame limits
// =============================================================================

// Upper bound on a single frame; a length above this is treated as stream
// corruption rather than an allocation request.
pub const MAXIMUM_FRAME_LENGTH: usize = 64 * 1024 * 1024;

// =============================================================================
// 2. write_frame / read_frame
// =============================================================================

pub fn write_frame(stream: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    let length = payload.len() as u32;
    stream.write_all(&length.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

pub fn read_frame(stream: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes)?;
    let length = u32::from_be_bytes(length_bytes) as usize;
    if length > MAXIMUM_FRAME_LENGTH {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {} exceeds maximum", length),
        ));
    }
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"ready").unwrap();
        write_frame(&mut buffer, b"").unwrap();
        write_frame(&mut buffer, b"1").unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"ready");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"1");
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buffer);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&8u32.to_be_bytes());
        buffer.extend_from_slice(b"shor");
        let mut cursor = std::io::Cursor::new(buffer);
        assert!(read_frame(&mut cursor).is_err());
    }
}
