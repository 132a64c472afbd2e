//! The fixed demonstration program.
//!
//! Sums five values through stack-slot memory operands in a patched loop,
//! then calls an externally resolved print routine with the result. This is
//! the computation the whole emitter exists to run; it exercises every
//! instruction form in the catalog plus both branch-patching paths.

use super::codebuf::CodeBuffer;
use super::memory::{DataMemory, MemoryError};
use super::x86_64::{Assembler, Cond, Mem, Reg, Scale};
use crate::config::RuntimeConfig;

/// The values the generated loop accumulates.
pub const VALUES: [i32; 5] = [5, 2, 3, 1, 4];

/// printf-style format string for the result.
const FORMAT: &str = "%ld\n";

// Frame layout, relative to RBP.
const SLOT_SUM: i8 = -0x08;
const SLOT_INDEX: i8 = -0x10;
const SLOT_VALUES: i8 = -0x40;
const FRAME_SIZE: i32 = 0x40;

/// Emit the sum-loop program.
///
/// `format_addr` is the absolute address of a NUL-terminated format string;
/// `print_addr` is the absolute address of an `extern "C"` routine taking
/// the format pointer and an i64, printf included. Both get embedded as
/// 64-bit immediates.
pub fn emit_sum_program(buf: &mut CodeBuffer, format_addr: u64, print_addr: u64) {
    let mut asm = Assembler::new(buf);

    asm.push(Reg::Rbp);
    asm.mov_mr(Reg::Rbp, Reg::Rsp);
    // The slots must sit above RSP: the print call pushes frames of its own
    // below it.
    asm.sub_mi32(Reg::Rsp, FRAME_SIZE);

    for (i, value) in VALUES.iter().enumerate() {
        asm.mov_mi32(Mem::disp8(Reg::Rbp, SLOT_VALUES + (i as i8) * 8), *value);
    }
    asm.mov_mi32(Mem::disp8(Reg::Rbp, SLOT_SUM), 0);
    asm.mov_mi32(Mem::disp8(Reg::Rbp, SLOT_INDEX), 0);

    // Loop test sits after the body; jump forward into it.
    let to_test = asm.jmp_forward();

    let body = asm.offset();
    asm.mov_rm(Reg::Rax, Mem::disp8(Reg::Rbp, SLOT_INDEX));
    asm.mov_rm(
        Reg::Rax,
        Mem::disp8(Reg::Rbp, SLOT_VALUES).indexed(Reg::Rax, Scale::S8),
    );
    asm.add_mr(Mem::disp8(Reg::Rbp, SLOT_SUM), Reg::Rax);
    asm.add_mi32(Mem::disp8(Reg::Rbp, SLOT_INDEX), 1);

    asm.patch_jump(to_test);
    asm.cmp_mi32(Mem::disp8(Reg::Rbp, SLOT_INDEX), VALUES.len() as i32 - 1);
    asm.jcc_to(Cond::Le, body);

    // System V call: format in RDI, value in RSI, RAX zeroed because the
    // callee may be variadic and reads AL as the vector-register count.
    asm.mov_rm(Reg::Rsi, Mem::disp8(Reg::Rbp, SLOT_SUM));
    asm.mov_ri64(Reg::Rdi, format_addr);
    asm.mov_ri64(Reg::R10, print_addr);
    asm.mov_ri64(Reg::Rax, 0);
    asm.call(Reg::R10);

    asm.add_mi32(Reg::Rsp, FRAME_SIZE);
    asm.pop(Reg::Rbp);
    asm.ret();
}

/// Assemble the demo program against a fresh data region.
///
/// The returned data region holds the format string the code refers to by
/// absolute address, so it must stay alive as long as the code can run.
pub fn assemble(config: &RuntimeConfig) -> Result<(CodeBuffer, DataMemory), MemoryError> {
    let mut data = DataMemory::new(config.data_capacity)?;
    let format_addr = data.write_cstr(FORMAT)?;

    let mut buf = CodeBuffer::with_limit(config.code_capacity);
    emit_sum_program(&mut buf, format_addr, libc::printf as usize as u64);

    Ok((buf, data))
}

/// Assemble the demo program, seal the code region, and execute it.
pub fn run(config: &RuntimeConfig) -> Result<(), MemoryError> {
    let (buf, _data) = assemble(config)?;
    if config.trace_jit {
        eprintln!(
            "jit: assembled {} bytes (code region limit {})",
            buf.len(),
            buf.limit()
        );
    }

    let mem = buf.finalize()?;
    if config.trace_jit {
        eprintln!("jit: entering generated code at {:p}", mem.as_ptr());
    }

    // SAFETY: the buffer holds a complete function that follows the
    // System V ABI, takes no arguments, and returns normally.
    let entry: extern "C" fn() = unsafe { mem.as_fn() }?;
    entry();

    Ok(())
}
