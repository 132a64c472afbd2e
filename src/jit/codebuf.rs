//! Code buffer for building JIT code.
//!
//! The buffer accumulates machine code bytes up to a fixed limit before the
//! whole sequence is copied into executable memory. Patching is done through
//! buffer offsets, never raw addresses, so sites stay valid no matter where
//! the bytes finally land.

use super::memory::{ExecutableMemory, MemoryError};

/// Default byte limit when no explicit capacity is given.
/// Matches the 4 KiB code page the demo program reserves.
pub const DEFAULT_LIMIT: usize = 4096;

/// A bounded buffer for building machine code.
///
/// Exceeding the limit is a programming error in the emitting code, not a
/// runtime condition, and panics.
pub struct CodeBuffer {
    code: Vec<u8>,
    limit: usize,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    /// Create a buffer that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            code: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Current write position, used as a jump target or patch site.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    fn check_room(&self, count: usize) {
        assert!(
            self.code.len() + count <= self.limit,
            "code buffer overflow: {} + {} exceeds limit {}",
            self.code.len(),
            count,
            self.limit
        );
    }

    /// Emit a single byte.
    pub fn emit_u8(&mut self, byte: u8) {
        self.check_room(1);
        self.code.push(byte);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.check_room(4);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.check_room(8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit multiple bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.check_room(bytes.len());
        self.code.extend_from_slice(bytes);
    }

    /// Overwrite a single already-emitted byte.
    pub fn patch_u8(&mut self, offset: usize, byte: u8) {
        self.code[offset] = byte;
    }

    /// Get the code bytes (for inspection and tests).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Consume the buffer and return the raw code bytes.
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Copy the code into a fresh executable region and seal it.
    pub fn finalize(self) -> Result<ExecutableMemory, MemoryError> {
        let mut mem = ExecutableMemory::new(self.code.len())?;
        mem.write(0, &self.code)?;
        mem.make_executable()?;
        Ok(mem)
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_bytes() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.emit_u32(0xDEADBEEF);
        buf.emit_u64(0x0102030405060708);

        assert_eq!(buf.len(), 13);
        assert_eq!(
            &buf.code()[..5],
            &[0x90, 0xEF, 0xBE, 0xAD, 0xDE],
            "values are little-endian"
        );
        assert_eq!(buf.code()[5..], [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_offset_tracks_len() {
        let mut buf = CodeBuffer::new();
        assert_eq!(buf.offset(), 0);
        buf.emit_bytes(&[1, 2, 3]);
        assert_eq!(buf.offset(), 3);
    }

    #[test]
    fn test_patch_u8() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xEB);
        buf.emit_u8(0x00);
        buf.patch_u8(1, 0x7F);
        assert_eq!(buf.code(), &[0xEB, 0x7F]);
    }

    #[test]
    #[should_panic(expected = "code buffer overflow")]
    fn test_limit_overflow_panics() {
        let mut buf = CodeBuffer::with_limit(2);
        buf.emit_u8(0x90);
        buf.emit_u8(0x90);
        buf.emit_u8(0x90);
    }

    #[test]
    #[should_panic(expected = "code buffer overflow")]
    fn test_limit_checked_before_partial_write() {
        let mut buf = CodeBuffer::with_limit(3);
        buf.emit_u32(0);
    }

    #[test]
    fn test_finalize_executes_ret() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xC3); // RET
        let mem = buf.finalize().unwrap();
        let entry: extern "C" fn() = unsafe { mem.as_fn() }.unwrap();
        entry();
    }
}
