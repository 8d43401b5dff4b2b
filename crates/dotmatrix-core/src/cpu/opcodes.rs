use std::fmt;

/// 8-bit operand, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R8 {
    B,
    C,
    D,
    E,
    H,
    L,
    HlInd,
    A,
}

impl R8 {
    const fn from_index(index: u8) -> Self {
        match index & 7 {
            0 => R8::B,
            1 => R8::C,
            2 => R8::D,
            3 => R8::E,
            4 => R8::H,
            5 => R8::L,
            6 => R8::HlInd,
            _ => R8::A,
        }
    }

    /// True for `(HL)`, which costs an extra bus access.
    pub const fn is_memory(self) -> bool {
        matches!(self, R8::HlInd)
    }
}

/// 16-bit register operand used by loads and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16 {
    Bc,
    De,
    Hl,
    Sp,
}

impl R16 {
    const fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => R16::Bc,
            1 => R16::De,
            2 => R16::Hl,
            _ => R16::Sp,
        }
    }
}

/// 16-bit register operand used by PUSH and POP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16Stack {
    Bc,
    De,
    Hl,
    Af,
}

impl R16Stack {
    const fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => R16Stack::Bc,
            1 => R16Stack::De,
            2 => R16Stack::Hl,
            _ => R16Stack::Af,
        }
    }
}

/// Indirect address operand of `LD (rr),A` and `LD A,(rr)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16Mem {
    Bc,
    De,
    HlInc,
    HlDec,
}

impl R16Mem {
    const fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => R16Mem::Bc,
            1 => R16Mem::De,
            2 => R16Mem::HlInc,
            _ => R16Mem::HlDec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Nz,
    Z,
    Nc,
    C,
}

impl Cond {
    const fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => Cond::Nz,
            1 => Cond::Z,
            2 => Cond::Nc,
            _ => Cond::C,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    const fn from_index(index: u8) -> Self {
        match index & 7 {
            0 => AluOp::Add,
            1 => AluOp::Adc,
            2 => AluOp::Sub,
            3 => AluOp::Sbc,
            4 => AluOp::And,
            5 => AluOp::Xor,
            6 => AluOp::Or,
            _ => AluOp::Cp,
        }
    }
}

/// Rotate and shift operations of the CB page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

impl ShiftOp {
    const fn from_index(index: u8) -> Self {
        match index & 7 {
            0 => ShiftOp::Rlc,
            1 => ShiftOp::Rrc,
            2 => ShiftOp::Rl,
            3 => ShiftOp::Rr,
            4 => ShiftOp::Sla,
            5 => ShiftOp::Sra,
            6 => ShiftOp::Swap,
            _ => ShiftOp::Srl,
        }
    }
}

/// Decoded instruction. Immediate operands are fetched at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    Ld8 { dst: R8, src: R8 },
    Ld8Imm(R8),
    Ld16Imm(R16),
    LdMemA(R16Mem),
    LdAMem(R16Mem),
    LdAbsSp,
    LdAbsA,
    LdAAbs,
    LdhImmA,
    LdhAImm,
    LdhCA,
    LdhAC,
    LdHlSpOffset,
    LdSpHl,
    Inc8(R8),
    Dec8(R8),
    Inc16(R16),
    Dec16(R16),
    AddHl(R16),
    AddSpOffset,
    Alu(AluOp, R8),
    AluImm(AluOp),
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Jr(Option<Cond>),
    Jp(Option<Cond>),
    JpHl,
    Call(Option<Cond>),
    Ret(Option<Cond>),
    Reti,
    Rst(u8),
    Push(R16Stack),
    Pop(R16Stack),
    /// Switch to the CB page for the next byte.
    Prefix,
    Shift(ShiftOp, R8),
    Bit(u8, R8),
    Res(u8, R8),
    Set(u8, R8),
    /// One of the eleven undefined base opcodes; hangs the CPU.
    Illegal,
}

/// Descriptor of one opcode. `cycles` counts clock cycles at normal speed
/// (four per M-cycle); `branch_cycles` is the cost when a condition is taken
/// and equals `cycles` for unconditional instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub length: u8,
    pub cycles: u8,
    pub branch_cycles: u8,
}

impl Opcode {
    pub const fn is_conditional(&self) -> bool {
        self.cycles != self.branch_cycles
    }
}

const fn fixed(op: Op, length: u8, cycles: u8) -> Opcode {
    Opcode {
        op,
        length,
        cycles,
        branch_cycles: cycles,
    }
}

const fn branch(op: Op, length: u8, cycles: u8, branch_cycles: u8) -> Opcode {
    Opcode {
        op,
        length,
        cycles,
        branch_cycles,
    }
}

const ILLEGAL: Opcode = fixed(Op::Illegal, 1, 4);

/// Base page, indexed by opcode byte.
pub static OPCODES: [Opcode; 256] = base_table();
/// CB page, indexed by the byte after 0xCB. Cycles include the prefix fetch.
pub static CB_OPCODES: [Opcode; 256] = cb_table();

const fn base_table() -> [Opcode; 256] {
    let mut table = [ILLEGAL; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_base(i as u8);
        i += 1;
    }
    table
}

const fn cb_table() -> [Opcode; 256] {
    let mut table = [ILLEGAL; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = decode_cb(i as u8);
        i += 1;
    }
    table
}

// Opcode byte layout: xx yyy zzz, with yyy split into pp q.
const fn decode_base(byte: u8) -> Opcode {
    let x = byte >> 6;
    let y = (byte >> 3) & 7;
    let z = byte & 7;
    let p = y >> 1;
    let q = y & 1;

    match x {
        0 => match z {
            0 => match y {
                0 => fixed(Op::Nop, 1, 4),
                1 => fixed(Op::LdAbsSp, 3, 20),
                2 => fixed(Op::Stop, 2, 4),
                3 => fixed(Op::Jr(None), 2, 12),
                _ => branch(Op::Jr(Some(Cond::from_index(y - 4))), 2, 8, 12),
            },
            1 => {
                if q == 0 {
                    fixed(Op::Ld16Imm(R16::from_index(p)), 3, 12)
                } else {
                    fixed(Op::AddHl(R16::from_index(p)), 1, 8)
                }
            }
            2 => {
                if q == 0 {
                    fixed(Op::LdMemA(R16Mem::from_index(p)), 1, 8)
                } else {
                    fixed(Op::LdAMem(R16Mem::from_index(p)), 1, 8)
                }
            }
            3 => {
                if q == 0 {
                    fixed(Op::Inc16(R16::from_index(p)), 1, 8)
                } else {
                    fixed(Op::Dec16(R16::from_index(p)), 1, 8)
                }
            }
            4 => {
                let r = R8::from_index(y);
                fixed(Op::Inc8(r), 1, if r.is_memory() { 12 } else { 4 })
            }
            5 => {
                let r = R8::from_index(y);
                fixed(Op::Dec8(r), 1, if r.is_memory() { 12 } else { 4 })
            }
            6 => {
                let r = R8::from_index(y);
                fixed(Op::Ld8Imm(r), 2, if r.is_memory() { 12 } else { 8 })
            }
            _ => {
                let op = match y {
                    0 => Op::Rlca,
                    1 => Op::Rrca,
                    2 => Op::Rla,
                    3 => Op::Rra,
                    4 => Op::Daa,
                    5 => Op::Cpl,
                    6 => Op::Scf,
                    _ => Op::Ccf,
                };
                fixed(op, 1, 4)
            }
        },
        1 => {
            if y == 6 && z == 6 {
                fixed(Op::Halt, 1, 4)
            } else {
                let dst = R8::from_index(y);
                let src = R8::from_index(z);
                let cycles = if dst.is_memory() || src.is_memory() { 8 } else { 4 };
                fixed(Op::Ld8 { dst, src }, 1, cycles)
            }
        }
        2 => {
            let src = R8::from_index(z);
            let cycles = if src.is_memory() { 8 } else { 4 };
            fixed(Op::Alu(AluOp::from_index(y), src), 1, cycles)
        }
        _ => match z {
            0 => match y {
                0..=3 => branch(Op::Ret(Some(Cond::from_index(y))), 1, 8, 20),
                4 => fixed(Op::LdhImmA, 2, 12),
                5 => fixed(Op::AddSpOffset, 2, 16),
                6 => fixed(Op::LdhAImm, 2, 12),
                _ => fixed(Op::LdHlSpOffset, 2, 12),
            },
            1 => {
                if q == 0 {
                    fixed(Op::Pop(R16Stack::from_index(p)), 1, 12)
                } else {
                    match p {
                        0 => fixed(Op::Ret(None), 1, 16),
                        1 => fixed(Op::Reti, 1, 16),
                        2 => fixed(Op::JpHl, 1, 4),
                        _ => fixed(Op::LdSpHl, 1, 8),
                    }
                }
            }
            2 => match y {
                0..=3 => branch(Op::Jp(Some(Cond::from_index(y))), 3, 12, 16),
                4 => fixed(Op::LdhCA, 1, 8),
                5 => fixed(Op::LdAbsA, 3, 16),
                6 => fixed(Op::LdhAC, 1, 8),
                _ => fixed(Op::LdAAbs, 3, 16),
            },
            3 => match y {
                0 => fixed(Op::Jp(None), 3, 16),
                1 => fixed(Op::Prefix, 1, 4),
                6 => fixed(Op::Di, 1, 4),
                7 => fixed(Op::Ei, 1, 4),
                _ => ILLEGAL,
            },
            4 => {
                if y < 4 {
                    branch(Op::Call(Some(Cond::from_index(y))), 3, 12, 24)
                } else {
                    ILLEGAL
                }
            }
            5 => {
                if q == 0 {
                    fixed(Op::Push(R16Stack::from_index(p)), 1, 16)
                } else if p == 0 {
                    fixed(Op::Call(None), 3, 24)
                } else {
                    ILLEGAL
                }
            }
            6 => fixed(Op::AluImm(AluOp::from_index(y)), 2, 8),
            _ => fixed(Op::Rst(y * 8), 1, 16),
        },
    }
}

const fn decode_cb(byte: u8) -> Opcode {
    let y = (byte >> 3) & 7;
    let r = R8::from_index(byte);
    let rmw = if r.is_memory() { 16 } else { 8 };

    match byte >> 6 {
        0 => fixed(Op::Shift(ShiftOp::from_index(y), r), 2, rmw),
        1 => fixed(Op::Bit(y, r), 2, if r.is_memory() { 12 } else { 8 }),
        2 => fixed(Op::Res(y, r), 2, rmw),
        _ => fixed(Op::Set(y, r), 2, rmw),
    }
}

impl fmt::Display for R8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            R8::B => "B",
            R8::C => "C",
            R8::D => "D",
            R8::E => "E",
            R8::H => "H",
            R8::L => "L",
            R8::HlInd => "(HL)",
            R8::A => "A",
        };
        f.write_str(name)
    }
}

impl fmt::Display for R16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            R16::Bc => "BC",
            R16::De => "DE",
            R16::Hl => "HL",
            R16::Sp => "SP",
        })
    }
}

impl fmt::Display for R16Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            R16Stack::Bc => "BC",
            R16Stack::De => "DE",
            R16Stack::Hl => "HL",
            R16Stack::Af => "AF",
        })
    }
}

impl fmt::Display for R16Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            R16Mem::Bc => "(BC)",
            R16Mem::De => "(DE)",
            R16Mem::HlInc => "(HL+)",
            R16Mem::HlDec => "(HL-)",
        })
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cond::Nz => "NZ",
            Cond::Z => "Z",
            Cond::Nc => "NC",
            Cond::C => "C",
        })
    }
}

impl AluOp {
    fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD A,",
            AluOp::Adc => "ADC A,",
            AluOp::Sub => "SUB ",
            AluOp::Sbc => "SBC A,",
            AluOp::And => "AND ",
            AluOp::Xor => "XOR ",
            AluOp::Or => "OR ",
            AluOp::Cp => "CP ",
        }
    }
}

impl fmt::Display for ShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShiftOp::Rlc => "RLC",
            ShiftOp::Rrc => "RRC",
            ShiftOp::Rl => "RL",
            ShiftOp::Rr => "RR",
            ShiftOp::Sla => "SLA",
            ShiftOp::Sra => "SRA",
            ShiftOp::Swap => "SWAP",
            ShiftOp::Srl => "SRL",
        })
    }
}

fn write_cond(f: &mut fmt::Formatter<'_>, mnemonic: &str, cond: Option<Cond>, target: &str) -> fmt::Result {
    match cond {
        Some(cond) => write!(f, "{mnemonic} {cond},{target}"),
        None => write!(f, "{mnemonic} {target}"),
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Op::Nop => f.write_str("NOP"),
            Op::Stop => f.write_str("STOP"),
            Op::Halt => f.write_str("HALT"),
            Op::Di => f.write_str("DI"),
            Op::Ei => f.write_str("EI"),
            Op::Ld8 { dst, src } => write!(f, "LD {dst},{src}"),
            Op::Ld8Imm(r) => write!(f, "LD {r},n"),
            Op::Ld16Imm(rr) => write!(f, "LD {rr},nn"),
            Op::LdMemA(m) => write!(f, "LD {m},A"),
            Op::LdAMem(m) => write!(f, "LD A,{m}"),
            Op::LdAbsSp => f.write_str("LD (nn),SP"),
            Op::LdAbsA => f.write_str("LD (nn),A"),
            Op::LdAAbs => f.write_str("LD A,(nn)"),
            Op::LdhImmA => f.write_str("LDH (n),A"),
            Op::LdhAImm => f.write_str("LDH A,(n)"),
            Op::LdhCA => f.write_str("LD (C),A"),
            Op::LdhAC => f.write_str("LD A,(C)"),
            Op::LdHlSpOffset => f.write_str("LD HL,SP+e"),
            Op::LdSpHl => f.write_str("LD SP,HL"),
            Op::Inc8(r) => write!(f, "INC {r}"),
            Op::Dec8(r) => write!(f, "DEC {r}"),
            Op::Inc16(rr) => write!(f, "INC {rr}"),
            Op::Dec16(rr) => write!(f, "DEC {rr}"),
            Op::AddHl(rr) => write!(f, "ADD HL,{rr}"),
            Op::AddSpOffset => f.write_str("ADD SP,e"),
            Op::Alu(op, r) => write!(f, "{}{r}", op.mnemonic()),
            Op::AluImm(op) => write!(f, "{}n", op.mnemonic()),
            Op::Rlca => f.write_str("RLCA"),
            Op::Rrca => f.write_str("RRCA"),
            Op::Rla => f.write_str("RLA"),
            Op::Rra => f.write_str("RRA"),
            Op::Daa => f.write_str("DAA"),
            Op::Cpl => f.write_str("CPL"),
            Op::Scf => f.write_str("SCF"),
            Op::Ccf => f.write_str("CCF"),
            Op::Jr(cond) => write_cond(f, "JR", cond, "e"),
            Op::Jp(cond) => write_cond(f, "JP", cond, "nn"),
            Op::JpHl => f.write_str("JP HL"),
            Op::Call(cond) => write_cond(f, "CALL", cond, "nn"),
            Op::Ret(Some(cond)) => write!(f, "RET {cond}"),
            Op::Ret(None) => f.write_str("RET"),
            Op::Reti => f.write_str("RETI"),
            Op::Rst(vector) => write!(f, "RST {vector:02X}H"),
            Op::Push(rr) => write!(f, "PUSH {rr}"),
            Op::Pop(rr) => write!(f, "POP {rr}"),
            Op::Prefix => f.write_str("PREFIX CB"),
            Op::Shift(op, r) => write!(f, "{op} {r}"),
            Op::Bit(bit, r) => write!(f, "BIT {bit},{r}"),
            Op::Res(bit, r) => write!(f, "RES {bit},{r}"),
            Op::Set(bit, r) => write!(f, "SET {bit},{r}"),
            Op::Illegal => f.write_str("ILLEGAL"),
        }
    }
}
