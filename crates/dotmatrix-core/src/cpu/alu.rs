//! Flag rules of the arithmetic and bit instructions.
//!
//! Every function returns the result together with the new F register.

use super::opcodes::{AluOp, ShiftOp};

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

#[inline]
fn zero(value: u8) -> u8 {
    if value == 0 { FLAG_Z } else { 0 }
}

#[inline]
fn carry(set: bool) -> u8 {
    if set { FLAG_C } else { 0 }
}

#[inline]
fn half(set: bool) -> u8 {
    if set { FLAG_H } else { 0 }
}

pub fn add(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as u8;
    let res = a.wrapping_add(b).wrapping_add(c);
    let f = zero(res)
        | half((a & 0x0F) + (b & 0x0F) + c > 0x0F)
        | carry(a as u16 + b as u16 + c as u16 > 0xFF);
    (res, f)
}

pub fn sub(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as u8;
    let res = a.wrapping_sub(b).wrapping_sub(c);
    let f = FLAG_N
        | zero(res)
        | half((a & 0x0F) < (b & 0x0F) + c)
        | carry((a as u16) < b as u16 + c as u16);
    (res, f)
}

/// One of the eight accumulator operations. CP leaves A unchanged.
pub fn alu(op: AluOp, a: u8, b: u8, flags: u8) -> (u8, u8) {
    let carry_in = flags & FLAG_C != 0;
    match op {
        AluOp::Add => add(a, b, false),
        AluOp::Adc => add(a, b, carry_in),
        AluOp::Sub => sub(a, b, false),
        AluOp::Sbc => sub(a, b, carry_in),
        AluOp::And => (a & b, zero(a & b) | FLAG_H),
        AluOp::Xor => (a ^ b, zero(a ^ b)),
        AluOp::Or => (a | b, zero(a | b)),
        AluOp::Cp => (a, sub(a, b, false).1),
    }
}

pub fn inc(value: u8, flags: u8) -> (u8, u8) {
    let res = value.wrapping_add(1);
    (res, (flags & FLAG_C) | zero(res) | half(value & 0x0F == 0x0F))
}

pub fn dec(value: u8, flags: u8) -> (u8, u8) {
    let res = value.wrapping_sub(1);
    (
        res,
        (flags & FLAG_C) | FLAG_N | zero(res) | half(value & 0x0F == 0),
    )
}

/// ADD HL,rr: Z is preserved, carries come from bits 11 and 15.
pub fn add16(a: u16, b: u16, flags: u8) -> (u16, u8) {
    let res = a.wrapping_add(b);
    let f = (flags & FLAG_Z)
        | half((a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF)
        | carry(a as u32 + b as u32 > 0xFFFF);
    (res, f)
}

/// ADD SP,e and LD HL,SP+e: carries come from the unsigned low byte.
pub fn add_sp(sp: u16, offset: i8) -> (u16, u8) {
    let value = offset as i16 as u16;
    let res = sp.wrapping_add(value);
    let f = half((sp & 0x0F) + (value & 0x0F) > 0x0F) | carry((sp & 0xFF) + (value & 0xFF) > 0xFF);
    (res, f)
}

/// CB-page rotates and shifts.
pub fn shift(op: ShiftOp, value: u8, flags: u8) -> (u8, u8) {
    let carry_in = (flags & FLAG_C != 0) as u8;
    let (res, carry_out) = match op {
        ShiftOp::Rlc => (value.rotate_left(1), value & 0x80 != 0),
        ShiftOp::Rrc => (value.rotate_right(1), value & 0x01 != 0),
        ShiftOp::Rl => ((value << 1) | carry_in, value & 0x80 != 0),
        ShiftOp::Rr => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
        ShiftOp::Sla => (value << 1, value & 0x80 != 0),
        ShiftOp::Sra => ((value >> 1) | (value & 0x80), value & 0x01 != 0),
        ShiftOp::Swap => (value.rotate_left(4), false),
        ShiftOp::Srl => (value >> 1, value & 0x01 != 0),
    };
    (res, zero(res) | carry(carry_out))
}

/// RLCA, RRCA, RLA and RRA always clear Z.
pub fn rotate_a(op: ShiftOp, a: u8, flags: u8) -> (u8, u8) {
    let (res, f) = shift(op, a, flags);
    (res, f & FLAG_C)
}

pub fn bit(index: u8, value: u8, flags: u8) -> u8 {
    (flags & FLAG_C) | FLAG_H | zero(value & (1 << index))
}

pub fn daa(a: u8, flags: u8) -> (u8, u8) {
    let mut adjust = 0u8;
    let mut carry_out = flags & FLAG_C != 0;
    let res = if flags & FLAG_N == 0 {
        if carry_out || a > 0x99 {
            adjust |= 0x60;
            carry_out = true;
        }
        if flags & FLAG_H != 0 || a & 0x0F > 0x09 {
            adjust |= 0x06;
        }
        a.wrapping_add(adjust)
    } else {
        if carry_out {
            adjust |= 0x60;
        }
        if flags & FLAG_H != 0 {
            adjust |= 0x06;
        }
        a.wrapping_sub(adjust)
    };
    (res, zero(res) | (flags & FLAG_N) | carry(carry_out))
}

pub fn cpl(a: u8, flags: u8) -> (u8, u8) {
    (!a, (flags & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H)
}

pub fn scf(flags: u8) -> u8 {
    (flags & FLAG_Z) | FLAG_C
}

pub fn ccf(flags: u8) -> u8 {
    (flags & FLAG_Z) | ((flags & FLAG_C) ^ FLAG_C)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_half_and_full_carry() {
        assert_eq!(add(0x0F, 0x01, false), (0x10, FLAG_H));
        assert_eq!(add(0xFF, 0x01, false), (0x00, FLAG_Z | FLAG_H | FLAG_C));
        assert_eq!(add(0x0E, 0x01, true), (0x10, FLAG_H));
    }

    #[test]
    fn sub_and_compare() {
        assert_eq!(sub(0x10, 0x01, false), (0x0F, FLAG_N | FLAG_H));
        assert_eq!(sub(0x00, 0x01, false), (0xFF, FLAG_N | FLAG_H | FLAG_C));
        assert_eq!(alu(AluOp::Cp, 0x42, 0x42, 0), (0x42, FLAG_Z | FLAG_N));
        assert_eq!(alu(AluOp::Sbc, 0x10, 0x0F, FLAG_C), (0x00, FLAG_Z | FLAG_N | FLAG_H));
    }

    #[test]
    fn logic_flags() {
        assert_eq!(alu(AluOp::And, 0xF0, 0x0F, FLAG_C), (0x00, FLAG_Z | FLAG_H));
        assert_eq!(alu(AluOp::Xor, 0xAA, 0xAA, FLAG_C), (0x00, FLAG_Z));
        assert_eq!(alu(AluOp::Or, 0x00, 0x01, 0xF0), (0x01, 0));
    }

    #[test]
    fn inc_dec_keep_carry() {
        assert_eq!(inc(0x0F, FLAG_C), (0x10, FLAG_C | FLAG_H));
        assert_eq!(inc(0xFF, 0), (0x00, FLAG_Z | FLAG_H));
        assert_eq!(dec(0x01, FLAG_C), (0x00, FLAG_C | FLAG_Z | FLAG_N));
        assert_eq!(dec(0x10, 0), (0x0F, FLAG_N | FLAG_H));
    }

    #[test]
    fn sixteen_bit_adds() {
        assert_eq!(add16(0x0FFF, 0x0001, FLAG_Z), (0x1000, FLAG_Z | FLAG_H));
        assert_eq!(add16(0xFFFF, 0x0001, 0), (0x0000, FLAG_H | FLAG_C));
        assert_eq!(add_sp(0x00FF, 1), (0x0100, FLAG_H | FLAG_C));
        assert_eq!(add_sp(0x0000, -1), (0xFFFF, 0));
        assert_eq!(add_sp(0xFFF8, 8), (0x0000, FLAG_H | FLAG_C));
    }

    #[test]
    fn rotates_and_shifts() {
        assert_eq!(shift(ShiftOp::Rlc, 0x80, 0), (0x01, FLAG_C));
        assert_eq!(shift(ShiftOp::Rl, 0x80, 0), (0x00, FLAG_Z | FLAG_C));
        assert_eq!(shift(ShiftOp::Rr, 0x01, FLAG_C), (0x80, FLAG_C));
        assert_eq!(shift(ShiftOp::Sra, 0x81, 0), (0xC0, FLAG_C));
        assert_eq!(shift(ShiftOp::Swap, 0xF0, FLAG_C), (0x0F, 0));
        assert_eq!(shift(ShiftOp::Srl, 0x01, 0), (0x00, FLAG_Z | FLAG_C));
        assert_eq!(rotate_a(ShiftOp::Rl, 0x80, 0), (0x00, FLAG_C));
    }

    #[test]
    fn bit_test_keeps_carry() {
        assert_eq!(bit(7, 0x7F, FLAG_C), FLAG_Z | FLAG_H | FLAG_C);
        assert_eq!(bit(0, 0x01, 0), FLAG_H);
    }

    #[test]
    fn daa_adjusts_bcd() {
        let (sum, f) = add(0x45, 0x38, false);
        assert_eq!(daa(sum, f), (0x83, 0));
        let (sum, f) = add(0x99, 0x01, false);
        assert_eq!(daa(sum, f), (0x00, FLAG_Z | FLAG_C));
        let (diff, f) = sub(0x42, 0x13, false);
        assert_eq!(daa(diff, f), (0x29, FLAG_N));
    }

    #[test]
    fn carry_flag_ops() {
        assert_eq!(cpl(0x0F, FLAG_Z), (0xF0, FLAG_Z | FLAG_N | FLAG_H));
        assert_eq!(scf(FLAG_N | FLAG_H), FLAG_C);
        assert_eq!(ccf(FLAG_C | FLAG_Z), FLAG_Z);
        assert_eq!(ccf(0), FLAG_C);
    }
}
