//! Streaming primitive decoder for bytecode assemblies.
//!
//! All multi-byte integers are little-endian; strings are length-prefixed
//! with a single byte.

use crate::error::LoaderError;
use crate::op_code::OpCode;
use std::io::Read;

/// Reads grammar primitives off a byte stream.
pub struct BytecodeReader<R: Read> {
    source: R,
    position: usize,
}

impl<R: Read> BytecodeReader<R> {
    pub fn new(source: R) -> Self {
        Self { source, position: 0 }
    }

    /// Bytes consumed so far, for error context.
    pub fn position(&self) -> usize {
        self.position
    }

    fn fill(&mut self, buffer: &mut [u8], context: &'static str) -> Result<(), LoaderError> {
        self.source.read_exact(buffer).map_err(|error| {
            if error.kind() == std::io::ErrorKind::UnexpectedEof {
                LoaderError::UnexpectedEof { context }
            } else {
                LoaderError::Io(error.to_string())
            }
        })?;
        self.position += buffer.len();
        Ok(())
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, LoaderError> {
        let mut buffer = [0u8; 1];
        self.fill(&mut buffer, context)?;
        Ok(buffer[0])
    }

    pub fn read_u16(&mut self, context: &'static str) -> Result<u16, LoaderError> {
        let mut buffer = [0u8; 2];
        self.fill(&mut buffer, context)?;
        Ok(u16::from_le_bytes(buffer))
    }

    pub fn read_u64(&mut self, context: &'static str) -> Result<u64, LoaderError> {
        let mut buffer = [0u8; 8];
        self.fill(&mut buffer, context)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Reads and decodes one opcode byte.
    pub fn read_opcode(&mut self) -> Result<OpCode, LoaderError> {
        let byte = self.read_u8("opcode")?;
        OpCode::from_byte(byte).ok_or(LoaderError::InvalidDeclaration {
            reason: format!("unknown opcode byte {byte:#04x}"),
        })
    }

    /// Reads a STRING_DECL payload: `<u8 length> <bytes>`.
    pub fn read_string(&mut self) -> Result<String, LoaderError> {
        let length = self.read_u8("string length")? as usize;
        let mut buffer = vec![0u8; length];
        self.fill(&mut buffer, "string bytes")?;
        String::from_utf8(buffer).map_err(|_| LoaderError::InvalidDeclaration {
            reason: "string is not valid UTF-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives() {
        let bytes = [
            0x2Au8, // u8
            0x34, 0x12, // u16
            1, 0, 0, 0, 0, 0, 0, 0, // u64
            3, b'a', b'b', b'c', // string
        ];
        let mut reader = BytecodeReader::new(&bytes[..]);
        assert_eq!(reader.read_u8("x").unwrap(), 0x2A);
        assert_eq!(reader.read_u16("x").unwrap(), 0x1234);
        assert_eq!(reader.read_u64("x").unwrap(), 1);
        assert_eq!(reader.read_string().unwrap(), "abc");
        assert_eq!(reader.position(), bytes.len());
    }

    #[test]
    fn eof_is_reported() {
        let mut reader = BytecodeReader::new(&[1u8][..]);
        assert!(reader.read_u16("pair").is_err());
    }

    #[test]
    fn unknown_opcode_byte() {
        let mut reader = BytecodeReader::new(&[0x01u8][..]);
        assert!(matches!(
            reader.read_opcode(),
            Err(LoaderError::InvalidDeclaration { .. })
        ));
    }
}
