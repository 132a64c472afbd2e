//! Memory regions for JIT execution, allocated with mmap.
//!
//! Two kinds of regions exist: `ExecutableMemory` holds machine code and is
//! writable until `make_executable` flips it to read+execute, and
//! `DataMemory` stays writable for the life of the process and hands out
//! absolute addresses of the bytes written into it (so they can be embedded
//! in generated code as 64-bit immediates).

use std::ptr::NonNull;

/// Error type for memory region operations.
#[derive(Debug, PartialEq, Eq)]
pub enum MemoryError {
    AllocationFailed,
    ProtectionFailed,
    InvalidSize,
    NotExecutable,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::InvalidSize => write!(f, "invalid memory size"),
            MemoryError::NotExecutable => write!(f, "region is not executable"),
        }
    }
}

impl std::error::Error for MemoryError {}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_to_pages(size: usize) -> usize {
    let page = page_size();
    (size + page - 1) & !(page - 1)
}

fn mmap_rw(size: usize) -> Result<NonNull<u8>, MemoryError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed);
    }

    NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
}

/// A block of memory that can hold machine code.
///
/// The block is writable when allocated. Call `make_executable` once all
/// code has been written; after that point writes are rejected and the
/// entry point can be taken with `as_fn`.
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate a writable block rounded up to whole pages.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let size = round_to_pages(size);
        let ptr = mmap_rw(size)?;

        Ok(Self {
            ptr,
            size,
            executable: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Write bytes at the given offset.
    ///
    /// Fails if the region has already been made executable or the write
    /// would run past the end of the region.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ProtectionFailed);
        }
        if offset + bytes.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }

        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, bytes.len());
        }

        Ok(())
    }

    /// Flip the region to read+execute. Writes are rejected afterwards.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }

        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };

        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        self.executable = true;
        Ok(())
    }

    /// Reinterpret the base of the region as a callable.
    ///
    /// This is the one place where generated bytes become control flow;
    /// everything else in the crate only moves bytes around.
    ///
    /// # Safety
    /// The caller must ensure the region contains valid x86-64 code whose
    /// ABI matches `F`.
    pub unsafe fn as_fn<F>(&self) -> Result<F, MemoryError>
    where
        F: Copy,
    {
        if !self.executable {
            return Err(MemoryError::NotExecutable);
        }
        if std::mem::size_of::<F>() != std::mem::size_of::<fn()>() {
            return Err(MemoryError::NotExecutable);
        }

        let ptr = self.ptr.as_ptr();
        // SAFETY: caller guarantees the region holds valid code for F's ABI
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

/// A writable data region with a bump cursor.
///
/// Generated code refers to its contents by absolute address, so the region
/// must outlive every execution of the code that mentions it.
#[derive(Debug)]
pub struct DataMemory {
    ptr: NonNull<u8>,
    size: usize,
    cursor: usize,
}

impl DataMemory {
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let size = round_to_pages(size);
        let ptr = mmap_rw(size)?;

        Ok(Self {
            ptr,
            size,
            cursor: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes written so far.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Append bytes and return their absolute address.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64, MemoryError> {
        if self.cursor + bytes.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }

        let addr = unsafe {
            let dest = self.ptr.as_ptr().add(self.cursor);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, bytes.len());
            dest as u64
        };
        self.cursor += bytes.len();

        Ok(addr)
    }

    /// Append a NUL-terminated string and return its absolute address.
    pub fn write_cstr(&mut self, s: &str) -> Result<u64, MemoryError> {
        let addr = self.write_bytes(s.as_bytes())?;
        self.write_bytes(&[0])?;
        Ok(addr)
    }
}

impl Drop for DataMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = ExecutableMemory::new(4096).unwrap();
        assert!(mem.size() >= 4096);
        assert!(!mem.is_executable());
    }

    #[test]
    fn test_size_rounds_to_pages() {
        let mem = ExecutableMemory::new(1).unwrap();
        assert_eq!(mem.size() % page_size(), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(
            ExecutableMemory::new(0).unwrap_err(),
            MemoryError::InvalidSize
        );
        assert_eq!(DataMemory::new(0).unwrap_err(), MemoryError::InvalidSize);
    }

    #[test]
    fn test_write_memory() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.write(0, &[0x90, 0x90, 0x90, 0x90]).unwrap();
    }

    #[test]
    fn test_write_out_of_bounds() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        let size = mem.size();
        assert_eq!(
            mem.write(size - 1, &[0x90, 0x90]).unwrap_err(),
            MemoryError::InvalidSize
        );
    }

    #[test]
    fn test_cannot_write_after_executable() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.make_executable().unwrap();
        assert_eq!(
            mem.write(0, &[0x90]).unwrap_err(),
            MemoryError::ProtectionFailed
        );
    }

    #[test]
    fn test_as_fn_requires_executable() {
        let mem = ExecutableMemory::new(4096).unwrap();
        let entry: Result<extern "C" fn(), _> = unsafe { mem.as_fn() };
        assert!(entry.is_err());
    }

    #[test]
    fn test_data_memory_cursor() {
        let mut data = DataMemory::new(4096).unwrap();
        let a = data.write_bytes(&[1, 2, 3]).unwrap();
        let b = data.write_bytes(&[4]).unwrap();
        assert_eq!(b - a, 3);
        assert_eq!(data.used(), 4);
    }

    #[test]
    fn test_data_memory_cstr() {
        let mut data = DataMemory::new(4096).unwrap();
        let addr = data.write_cstr("%ld\n").unwrap();
        assert_eq!(data.used(), 5);
        let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, 5) };
        assert_eq!(bytes, b"%ld\n\0");
    }

    #[test]
    fn test_data_memory_overflow() {
        let mut data = DataMemory::new(4096).unwrap();
        let size = data.size();
        data.write_bytes(&vec![0u8; size]).unwrap();
        assert_eq!(data.write_bytes(&[0]).unwrap_err(), MemoryError::InvalidSize);
    }
}
