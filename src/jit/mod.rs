//! JIT emission infrastructure.
//!
//! This module provides everything between "describe an instruction" and
//! "the CPU ran it":
//! - Executable and data memory regions (mmap)
//! - A bounded code buffer with offset-based patch sites
//! - x86-64 instruction encoding
//! - The fixed demonstration program and its launcher

pub mod codebuf;
pub mod demo;
pub mod memory;
pub mod x86_64;
