//! picojit - a minimal x86-64 JIT emitter
//!
//! This library encodes a small catalog of x86-64 instructions directly
//! into an executable memory region and transfers control into it. There
//! is no source language and no IR: the program is whatever sequence of
//! encoder calls the embedder makes.

pub mod config;
pub mod jit;

// Re-export commonly used types
pub use config::{DumpFormat, RuntimeConfig};
pub use jit::codebuf::CodeBuffer;
pub use jit::memory::{DataMemory, ExecutableMemory, MemoryError};
pub use jit::x86_64::{Assembler, Cond, Disp, JumpPatch, Mem, Operand, Reg, Scale};
