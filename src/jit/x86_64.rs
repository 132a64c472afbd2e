//! x86-64 instruction encoding.
//!
//! Every instruction form the emitter knows is a thin wrapper over one
//! generic encode routine per encoding shape (register-in-opcode, ModRM
//! operand, ModRM operand plus immediate, and so on), with the opcode and
//! any ModRM opcode extension supplied as constants. All ModRM instructions
//! carry a REX.W prefix: this emitter only produces 64-bit operand forms.

use super::codebuf::CodeBuffer;

const REX_W: u8 = 0x48;

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// The low 3 bits, which is all a ModRM/SIB field can hold.
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether the register's number needs a REX extension bit.
    /// r8 is 8, so the fourth bit of the id is exactly that bit.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >> 3 & 1 == 1
    }
}

/// All sixteen registers, in encoding order.
pub const ALL_REGS: [Reg; 16] = [
    Reg::Rax,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rbx,
    Reg::Rsp,
    Reg::Rbp,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// x86-64 condition codes (for Jcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

/// Index scale factor for SIB addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Scale {
    S1 = 0,
    S2 = 1,
    S4 = 2,
    S8 = 3,
}

/// Displacement attached to a memory operand. The width tag decides the
/// ModRM mode bits, so an out-of-range value cannot be half-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disp {
    None,
    D8(i8),
    D32(i32),
}

/// A memory operand: base register, optional scaled index, displacement.
#[derive(Debug, Clone, Copy)]
pub struct Mem {
    pub base: Reg,
    pub index: Option<(Reg, Scale)>,
    pub disp: Disp,
}

impl Mem {
    /// `[base]`
    pub fn base(base: Reg) -> Self {
        Self {
            base,
            index: None,
            disp: Disp::None,
        }
    }

    /// `[base + disp8]`
    pub fn disp8(base: Reg, disp: i8) -> Self {
        Self {
            base,
            index: None,
            disp: Disp::D8(disp),
        }
    }

    /// `[base + disp32]`
    pub fn disp32(base: Reg, disp: i32) -> Self {
        Self {
            base,
            index: None,
            disp: Disp::D32(disp),
        }
    }

    /// Add a scaled index register: `[base + index*scale + disp]`.
    /// RSP cannot be an index; its SIB index slot means "no index".
    pub fn indexed(mut self, index: Reg, scale: Scale) -> Self {
        self.index = Some((index, scale));
        self
    }
}

/// One instruction operand: a register or a memory reference.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Reg(Reg),
    Mem(Mem),
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<Mem> for Operand {
    fn from(mem: Mem) -> Self {
        Operand::Mem(mem)
    }
}

/// An emitted but unresolved forward-jump displacement byte, identified by
/// its offset in the code buffer.
#[derive(Debug, Clone, Copy)]
#[must_use = "an unpatched forward jump lands one byte past itself"]
pub struct JumpPatch {
    site: usize,
}

/// Whether an instruction needs the REX.W 64-bit operand prefix, or only a
/// REX prefix when an extended register forces one.
#[derive(Clone, Copy)]
enum RexMode {
    Wide,
    IfNeeded,
}

/// x86-64 assembler writing into a borrowed code buffer.
pub struct Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    /// Current write position, usable as a backward jump target.
    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Encode REX + opcode + ModRM (+ SIB) (+ displacement) for one
    /// register-or-memory operand.
    ///
    /// `reg` is the ModRM reg field as a 4-bit register id, or a 3-bit
    /// opcode extension (which never sets the REX.R bit).
    fn emit_operand_insn(&mut self, rex: RexMode, opcode: u8, reg: u8, rm: Operand) {
        let (mode, rm_id, index, disp) = match rm {
            Operand::Reg(r) => (0b11, r as u8, None, Disp::None),
            Operand::Mem(m) => {
                // mod=00 rm=101 means RIP-relative, so a bare [rbp]/[r13]
                // has no encoding of its own and becomes [base + 0].
                let disp = match (m.disp, m.base) {
                    (Disp::None, Reg::Rbp | Reg::R13) => Disp::D8(0),
                    (d, _) => d,
                };
                (
                    match disp {
                        Disp::None => 0b00,
                        Disp::D8(_) => 0b01,
                        Disp::D32(_) => 0b10,
                    },
                    m.base as u8,
                    m.index,
                    disp,
                )
            }
        };

        // rm=100 in an indirect mode is the SIB escape, so RSP-class bases
        // (and any scaled index) must go through a SIB byte.
        let use_sib = mode != 0b11 && (index.is_some() || (rm_id & 0b111) == 0b100);

        let mut rex_byte = ((reg >> 3) << 2) | (rm_id >> 3);
        if let Some((idx, _)) = index {
            rex_byte |= ((idx as u8) >> 3) << 1;
        }
        match rex {
            RexMode::Wide => self.buf.emit_u8(REX_W | rex_byte),
            RexMode::IfNeeded => {
                if rex_byte != 0 {
                    self.buf.emit_u8(0x40 | rex_byte);
                }
            }
        }

        self.buf.emit_u8(opcode);

        let rm_field = if use_sib { 0b100 } else { rm_id & 0b111 };
        self.buf.emit_u8(Self::modrm(mode, reg, rm_field));

        if use_sib {
            let (index_field, scale) = match index {
                Some((idx, scale)) => (idx.code(), scale),
                // index slot 100 means "no index"
                None => (0b100, Scale::S1),
            };
            self.buf
                .emit_u8(((scale as u8) << 6) | (index_field << 3) | (rm_id & 0b111));
        }

        match disp {
            Disp::None => {}
            Disp::D8(d) => self.buf.emit_u8(d as u8),
            Disp::D32(d) => self.buf.emit_u32(d as u32),
        }
    }

    // ==================== Generic encoding shapes ====================

    /// Zero-operand: bare opcode.
    fn op_zo(&mut self, opcode: u8) {
        self.buf.emit_u8(opcode);
    }

    /// Register-in-opcode: the register's low bits are added to the opcode,
    /// its high bit goes to REX.B.
    fn op_o(&mut self, opcode: u8, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(opcode + reg.code());
    }

    /// Register-in-opcode with a trailing 64-bit immediate.
    fn op_oi(&mut self, opcode: u8, reg: Reg, imm: u64) {
        self.buf.emit_u8(REX_W | reg.needs_rex_ext() as u8);
        self.buf.emit_u8(opcode + reg.code());
        self.buf.emit_u64(imm);
    }

    /// Operand with a fixed opcode extension in the reg field.
    fn op_m(&mut self, rex: RexMode, opcode: u8, ext: u8, rm: Operand) {
        self.emit_operand_insn(rex, opcode, ext, rm);
    }

    /// Operand with an opcode extension and a trailing 32-bit immediate.
    fn op_mi(&mut self, opcode: u8, ext: u8, rm: Operand, imm: u32) {
        self.emit_operand_insn(RexMode::Wide, opcode, ext, rm);
        self.buf.emit_u32(imm);
    }

    /// Operand plus a true register in the reg field. Direction (which side
    /// is the destination) is fixed by the opcode, not a flag.
    fn op_rm(&mut self, opcode: u8, reg: Reg, rm: Operand) {
        self.emit_operand_insn(RexMode::Wide, opcode, reg as u8, rm);
    }

    // ==================== Instruction catalog ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        self.op_o(0x50, reg);
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        self.op_o(0x58, reg);
    }

    /// RET
    pub fn ret(&mut self) {
        self.op_zo(0xC3);
    }

    /// NOP
    pub fn nop(&mut self) {
        self.op_zo(0x90);
    }

    /// MOV r64, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: u64) {
        self.op_oi(0xB8, dst, imm);
    }

    /// MOV r/m64, imm32 (sign-extended)
    pub fn mov_mi32(&mut self, dst: impl Into<Operand>, imm: i32) {
        self.op_mi(0xC7, 0, dst.into(), imm as u32);
    }

    /// MOV r/m64, r64
    pub fn mov_mr(&mut self, dst: impl Into<Operand>, src: Reg) {
        self.op_rm(0x89, src, dst.into());
    }

    /// MOV r64, r/m64
    pub fn mov_rm(&mut self, dst: Reg, src: impl Into<Operand>) {
        self.op_rm(0x8B, dst, src.into());
    }

    /// ADD r/m64, imm32 (sign-extended)
    pub fn add_mi32(&mut self, dst: impl Into<Operand>, imm: i32) {
        self.op_mi(0x81, 0, dst.into(), imm as u32);
    }

    /// ADD r/m64, r64
    pub fn add_mr(&mut self, dst: impl Into<Operand>, src: Reg) {
        self.op_rm(0x01, src, dst.into());
    }

    /// ADD r64, r/m64
    pub fn add_rm(&mut self, dst: Reg, src: impl Into<Operand>) {
        self.op_rm(0x03, dst, src.into());
    }

    /// SUB r/m64, imm32 (sign-extended)
    pub fn sub_mi32(&mut self, dst: impl Into<Operand>, imm: i32) {
        self.op_mi(0x81, 5, dst.into(), imm as u32);
    }

    /// SUB r/m64, r64
    pub fn sub_mr(&mut self, dst: impl Into<Operand>, src: Reg) {
        self.op_rm(0x29, src, dst.into());
    }

    /// SUB r64, r/m64
    pub fn sub_rm(&mut self, dst: Reg, src: impl Into<Operand>) {
        self.op_rm(0x2B, dst, src.into());
    }

    /// CMP r/m64, imm32 (sign-extended)
    pub fn cmp_mi32(&mut self, dst: impl Into<Operand>, imm: i32) {
        self.op_mi(0x81, 7, dst.into(), imm as u32);
    }

    /// CMP r/m64, r64
    pub fn cmp_mr(&mut self, dst: impl Into<Operand>, src: Reg) {
        self.op_rm(0x39, src, dst.into());
    }

    /// CMP r64, r/m64
    pub fn cmp_rm(&mut self, dst: Reg, src: impl Into<Operand>) {
        self.op_rm(0x3B, dst, src.into());
    }

    /// CALL r/m64 (indirect, absolute)
    pub fn call(&mut self, target: impl Into<Operand>) {
        // near call defaults to 64-bit; no REX.W needed
        self.op_m(RexMode::IfNeeded, 0xFF, 2, target.into());
    }

    /// JMP rel8
    pub fn jmp_rel8(&mut self, offset: i8) {
        self.buf.emit_u8(0xEB);
        self.buf.emit_u8(offset as u8);
    }

    /// JMP rel32
    pub fn jmp_rel32(&mut self, offset: i32) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_u32(offset as u32);
    }

    // ==================== Branch patching ====================

    /// Emit a short jump whose target is not known yet. The displacement
    /// byte is reserved and identified by buffer offset; resolve it with
    /// [`Assembler::patch_jump`] once the target position is reached.
    pub fn jmp_forward(&mut self) -> JumpPatch {
        self.buf.emit_u8(0xEB);
        let site = self.buf.offset();
        self.buf.emit_u8(0x00);
        JumpPatch { site }
    }

    /// Resolve a forward jump to the current position. The displacement is
    /// relative to the end of the jump instruction (the byte after the
    /// patch site) and must fit in a signed byte.
    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.buf.offset();
        let delta = target as i64 - (patch.site as i64 + 1);
        assert!(
            (-128..=127).contains(&delta),
            "forward jump displacement {} does not fit in one byte",
            delta
        );
        self.buf.patch_u8(patch.site, delta as i8 as u8);
    }

    /// Jcc to a known buffer offset, choosing between the short (2-byte)
    /// and near (6-byte) encodings. The displacement is relative to the end
    /// of the instruction, so its value depends on which form is chosen and
    /// the two are computed together.
    pub fn jcc_to(&mut self, cond: Cond, target: usize) {
        let pos = self.buf.offset() as i64;
        let short = target as i64 - (pos + 2);
        if (-128..=127).contains(&short) {
            self.buf.emit_u8(0x70 + cond as u8);
            self.buf.emit_u8(short as i8 as u8);
        } else {
            let near = target as i64 - (pos + 6);
            assert!(
                near >= i32::MIN as i64 && near <= i32::MAX as i64,
                "conditional jump displacement {} does not fit in four bytes",
                near
            );
            self.buf.emit_u8(0x0F);
            self.buf.emit_u8(0x80 + cond as u8);
            self.buf.emit_u32(near as i32 as u32);
        }
    }
}
