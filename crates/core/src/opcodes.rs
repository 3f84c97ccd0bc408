//! HD6301 opcode dispatch table.
//!
//! Every one of the 256 opcode bytes maps to an [`Opcode`] entry carrying
//! the operation, its addressing mode, the base cycle cost, and the
//! assembler mnemonic. The table is built at compile time and is the only
//! source of cycle costs in the crate: the engine charges `cycles` for each
//! instruction and the disassembler reads `mnemonic` and `mode`.
//!
//! Opcodes the HD6301 does not define map to [`Op::Illegal`].

/// Accumulator selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acc {
    A,
    B,
}

/// Operand location for single-operand read-modify-write instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    A,
    B,
    Mem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unary {
    Neg,
    Com,
    Lsr,
    Ror,
    Asr,
    Asl,
    Rol,
    Dec,
    Inc,
    Tst,
    Clr,
}

/// Two-operand accumulator operations (accumulator op memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alu {
    Sub,
    Cmp,
    Sbc,
    And,
    Bit,
    Lda,
    Eor,
    Adc,
    Ora,
    Add,
}

/// Branch conditions, in opcode order 0x20..=0x2F
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Always,
    Never,
    Hi,
    Ls,
    Cc,
    Cs,
    Ne,
    Eq,
    Vc,
    Vs,
    Pl,
    Mi,
    Ge,
    Lt,
    Gt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Illegal,
    // Inherent
    Nop,
    Lsrd,
    Asld,
    Tap,
    Tpa,
    Inx,
    Dex,
    Clv,
    Sev,
    Clc,
    Sec,
    Cli,
    Sei,
    Sba,
    Cba,
    Tab,
    Tba,
    Xgdx,
    Daa,
    Slp,
    Aba,
    Tsx,
    Ins,
    Pula,
    Pulb,
    Des,
    Txs,
    Psha,
    Pshb,
    Pulx,
    Rts,
    Abx,
    Rti,
    Pshx,
    Mul,
    Wai,
    Swi,
    // Control flow
    Branch(Cond),
    Jmp,
    Jsr,
    Bsr,
    // Single operand
    Unary(Unary, Target),
    // Immediate-to-memory bit operations (HD6301 only)
    Aim,
    Oim,
    Eim,
    Tim,
    // Accumulator
    Alu(Alu, Acc),
    Sta(Acc),
    // 16-bit
    Subd,
    Addd,
    Cpx,
    Ldd,
    Std,
    Ldx,
    Stx,
    Lds,
    Sts,
}

/// Addressing mode, which fixes the operand bytes following the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Inherent,
    /// One immediate byte
    Imm8,
    /// Two immediate bytes, big-endian
    Imm16,
    /// One address byte in page zero
    Direct,
    /// One unsigned offset byte added to X
    Indexed,
    /// Two address bytes, big-endian
    Extended,
    /// One signed displacement byte from the next instruction
    Relative,
    /// Immediate mask byte then a page-zero address byte
    BitDirect,
    /// Immediate mask byte then an offset byte added to X
    BitIndexed,
}

impl Mode {
    /// Total instruction length in bytes, opcode included.
    pub const fn len(self) -> u16 {
        match self {
            Mode::Inherent => 1,
            Mode::Imm8 | Mode::Direct | Mode::Indexed | Mode::Relative => 2,
            Mode::Imm16 | Mode::Extended | Mode::BitDirect | Mode::BitIndexed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub mode: Mode,
    /// Base cost in E-clock cycles
    pub cycles: u8,
    pub mnemonic: &'static str,
}

/// Opcode byte of SWI. Interrupt entry is charged the same cost.
pub const SWI_OPCODE: u8 = 0x3F;

/// Cost charged for an undefined opcode executed as a no-op
pub const UNDEFINED_CYCLES: u8 = 2;

const fn entry(op: Op, mode: Mode, cycles: u8, mnemonic: &'static str) -> Opcode {
    Opcode { op, mode, cycles, mnemonic }
}

const UNDEFINED: Opcode = entry(Op::Illegal, Mode::Inherent, UNDEFINED_CYCLES, "???");

const INHERENT: [(u8, Op, u8, &str); 44] = [
    (0x01, Op::Nop, 1, "NOP"),
    (0x04, Op::Lsrd, 1, "LSRD"),
    (0x05, Op::Asld, 1, "ASLD"),
    (0x06, Op::Tap, 1, "TAP"),
    (0x07, Op::Tpa, 1, "TPA"),
    (0x08, Op::Inx, 1, "INX"),
    (0x09, Op::Dex, 1, "DEX"),
    (0x0A, Op::Clv, 1, "CLV"),
    (0x0B, Op::Sev, 1, "SEV"),
    (0x0C, Op::Clc, 1, "CLC"),
    (0x0D, Op::Sec, 1, "SEC"),
    (0x0E, Op::Cli, 1, "CLI"),
    (0x0F, Op::Sei, 1, "SEI"),
    (0x10, Op::Sba, 1, "SBA"),
    (0x11, Op::Cba, 1, "CBA"),
    (0x16, Op::Tab, 1, "TAB"),
    (0x17, Op::Tba, 1, "TBA"),
    (0x18, Op::Xgdx, 2, "XGDX"),
    (0x19, Op::Daa, 2, "DAA"),
    (0x1A, Op::Slp, 4, "SLP"),
    (0x1B, Op::Aba, 1, "ABA"),
    (0x30, Op::Tsx, 1, "TSX"),
    (0x31, Op::Ins, 1, "INS"),
    (0x32, Op::Pula, 3, "PULA"),
    (0x33, Op::Pulb, 3, "PULB"),
    (0x34, Op::Des, 1, "DES"),
    (0x35, Op::Txs, 1, "TXS"),
    (0x36, Op::Psha, 4, "PSHA"),
    (0x37, Op::Pshb, 4, "PSHB"),
    (0x38, Op::Pulx, 4, "PULX"),
    (0x39, Op::Rts, 5, "RTS"),
    (0x3A, Op::Abx, 1, "ABX"),
    (0x3B, Op::Rti, 10, "RTI"),
    (0x3C, Op::Pshx, 5, "PSHX"),
    (0x3D, Op::Mul, 7, "MUL"),
    (0x3E, Op::Wai, 9, "WAI"),
    (0x3F, Op::Swi, 12, "SWI"),
    // Bit operations and jumps sharing the single-operand rows
    (0x61, Op::Aim, 7, "AIM"),
    (0x62, Op::Oim, 7, "OIM"),
    (0x65, Op::Eim, 7, "EIM"),
    (0x6B, Op::Tim, 5, "TIM"),
    (0x71, Op::Aim, 6, "AIM"),
    (0x72, Op::Oim, 6, "OIM"),
    (0x75, Op::Eim, 6, "EIM"),
];

const BRANCHES: [(Cond, &str); 16] = [
    (Cond::Always, "BRA"),
    (Cond::Never, "BRN"),
    (Cond::Hi, "BHI"),
    (Cond::Ls, "BLS"),
    (Cond::Cc, "BCC"),
    (Cond::Cs, "BCS"),
    (Cond::Ne, "BNE"),
    (Cond::Eq, "BEQ"),
    (Cond::Vc, "BVC"),
    (Cond::Vs, "BVS"),
    (Cond::Pl, "BPL"),
    (Cond::Mi, "BMI"),
    (Cond::Ge, "BGE"),
    (Cond::Lt, "BLT"),
    (Cond::Gt, "BGT"),
    (Cond::Le, "BLE"),
];

/// (low nibble, operation, [A form, B form, memory form], memory cycles)
const UNARY: [(u8, Unary, [&str; 3], u8); 11] = [
    (0x0, Unary::Neg, ["NEGA", "NEGB", "NEG"], 6),
    (0x3, Unary::Com, ["COMA", "COMB", "COM"], 6),
    (0x4, Unary::Lsr, ["LSRA", "LSRB", "LSR"], 6),
    (0x6, Unary::Ror, ["RORA", "RORB", "ROR"], 6),
    (0x7, Unary::Asr, ["ASRA", "ASRB", "ASR"], 6),
    (0x8, Unary::Asl, ["ASLA", "ASLB", "ASL"], 6),
    (0x9, Unary::Rol, ["ROLA", "ROLB", "ROL"], 6),
    (0xA, Unary::Dec, ["DECA", "DECB", "DEC"], 6),
    (0xC, Unary::Inc, ["INCA", "INCB", "INC"], 6),
    (0xD, Unary::Tst, ["TSTA", "TSTB", "TST"], 4),
    (0xF, Unary::Clr, ["CLRA", "CLRB", "CLR"], 5),
];

/// (low nibble, operation, [A form, B form])
const ALU: [(u8, Alu, [&str; 2]); 10] = [
    (0x0, Alu::Sub, ["SUBA", "SUBB"]),
    (0x1, Alu::Cmp, ["CMPA", "CMPB"]),
    (0x2, Alu::Sbc, ["SBCA", "SBCB"]),
    (0x4, Alu::And, ["ANDA", "ANDB"]),
    (0x5, Alu::Bit, ["BITA", "BITB"]),
    (0x6, Alu::Lda, ["LDAA", "LDAB"]),
    (0x8, Alu::Eor, ["EORA", "EORB"]),
    (0x9, Alu::Adc, ["ADCA", "ADCB"]),
    (0xA, Alu::Ora, ["ORAA", "ORAB"]),
    (0xB, Alu::Add, ["ADDA", "ADDB"]),
];

/// 16-bit operations: (opcode in the immediate row, operation, mnemonic, has immediate form)
const WORD: [(u8, Op, &str, bool); 9] = [
    (0x83, Op::Subd, "SUBD", true),
    (0x8C, Op::Cpx, "CPX", true),
    (0x8E, Op::Lds, "LDS", true),
    (0x8F, Op::Sts, "STS", false),
    (0xC3, Op::Addd, "ADDD", true),
    (0xCC, Op::Ldd, "LDD", true),
    (0xCD, Op::Std, "STD", false),
    (0xCE, Op::Ldx, "LDX", true),
    (0xCF, Op::Stx, "STX", false),
];

/// Row modes for the 0x80..=0xFF half: immediate, direct, indexed, extended
const ROW_MODES: [Mode; 4] = [Mode::Imm8, Mode::Direct, Mode::Indexed, Mode::Extended];

const fn build_table() -> [Opcode; 256] {
    let mut t = [UNDEFINED; 256];

    let mut i = 0;
    while i < INHERENT.len() {
        let (code, op, cycles, name) = INHERENT[i];
        let mode = match op {
            Op::Aim | Op::Oim | Op::Eim | Op::Tim => {
                if code >= 0x70 { Mode::BitDirect } else { Mode::BitIndexed }
            }
            _ => Mode::Inherent,
        };
        t[code as usize] = entry(op, mode, cycles, name);
        i += 1;
    }
    t[0x7B] = entry(Op::Tim, Mode::BitDirect, 4, "TIM");

    i = 0;
    while i < BRANCHES.len() {
        let (cond, name) = BRANCHES[i];
        t[0x20 + i] = entry(Op::Branch(cond), Mode::Relative, 3, name);
        i += 1;
    }

    i = 0;
    while i < UNARY.len() {
        let (low, kind, names, mem_cycles) = UNARY[i];
        let low = low as usize;
        t[0x40 | low] = entry(Op::Unary(kind, Target::A), Mode::Inherent, 1, names[0]);
        t[0x50 | low] = entry(Op::Unary(kind, Target::B), Mode::Inherent, 1, names[1]);
        t[0x60 | low] = entry(Op::Unary(kind, Target::Mem), Mode::Indexed, mem_cycles, names[2]);
        t[0x70 | low] = entry(Op::Unary(kind, Target::Mem), Mode::Extended, mem_cycles, names[2]);
        i += 1;
    }
    t[0x6E] = entry(Op::Jmp, Mode::Indexed, 3, "JMP");
    t[0x7E] = entry(Op::Jmp, Mode::Extended, 3, "JMP");

    // Accumulator rows: 0x80/0xC0 immediate, 0x90/0xD0 direct, 0xA0/0xE0 indexed, 0xB0/0xF0 extended
    const ALU_CYCLES: [u8; 4] = [2, 3, 4, 4];
    let mut row = 0;
    while row < 4 {
        let mode = ROW_MODES[row];
        i = 0;
        while i < ALU.len() {
            let (low, kind, names) = ALU[i];
            let low = low as usize;
            t[0x80 | (row << 4) | low] = entry(Op::Alu(kind, Acc::A), mode, ALU_CYCLES[row], names[0]);
            t[0xC0 | (row << 4) | low] = entry(Op::Alu(kind, Acc::B), mode, ALU_CYCLES[row], names[1]);
            i += 1;
        }
        if row > 0 {
            t[0x87 | (row << 4)] = entry(Op::Sta(Acc::A), mode, ALU_CYCLES[row], "STAA");
            t[0xC7 | (row << 4)] = entry(Op::Sta(Acc::B), mode, ALU_CYCLES[row], "STAB");
        }

        const WORD_CYCLES: [u8; 4] = [3, 4, 5, 5];
        let word_mode = if row == 0 { Mode::Imm16 } else { mode };
        i = 0;
        while i < WORD.len() {
            let (code, op, name, has_imm) = WORD[i];
            if row > 0 || has_imm {
                t[code as usize | (row << 4)] = entry(op, word_mode, WORD_CYCLES[row], name);
            }
            i += 1;
        }
        row += 1;
    }

    t[0x8D] = entry(Op::Bsr, Mode::Relative, 5, "BSR");
    t[0x9D] = entry(Op::Jsr, Mode::Direct, 5, "JSR");
    t[0xAD] = entry(Op::Jsr, Mode::Indexed, 5, "JSR");
    t[0xBD] = entry(Op::Jsr, Mode::Extended, 6, "JSR");

    t
}

/// The dispatch table, indexed by opcode byte.
pub static TABLE: [Opcode; 256] = build_table();

/// Look up the table entry for an opcode byte.
#[inline(always)]
pub fn lookup(opcode: u8) -> &'static Opcode {
    &TABLE[opcode as usize]
}
