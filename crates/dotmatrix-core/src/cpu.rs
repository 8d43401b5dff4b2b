mod alu;
pub mod opcodes;

use log::warn;

use crate::{hardware::HardwareMode, interrupts::Interrupts};
use opcodes::{CB_OPCODES, Cond, OPCODES, Op, R8, R16, R16Mem, R16Stack, ShiftOp};

pub use alu::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z};

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;

const DMG_BOOT_AF: u16 = 0x01B0;
const DMG_BOOT_BC: u16 = 0x0013;
const DMG_BOOT_DE: u16 = 0x00D8;
const DMG_BOOT_HL: u16 = 0x014D;

const CGB_BOOT_AF: u16 = 0x1180;
const CGB_BOOT_BC: u16 = 0x0000;
const CGB_BOOT_DE: u16 = 0xFF56;
const CGB_BOOT_HL: u16 = 0x000D;

// Color hardware running a monochrome cartridge.
const CGB_DMG_BOOT_DE: u16 = 0x0008;
const CGB_DMG_BOOT_HL: u16 = 0x007C;

/// Dots reported for a step in which the CPU does not touch the bus.
const IDLE_STEP_DOTS: u32 = 4;

/// What the CPU sees of the rest of the machine.
///
/// Every `read8`/`write8` is followed by one `tick`, which advances the
/// peripherals by one M-cycle and returns the dots that elapsed.
pub trait Bus {
    fn read8(&mut self, addr: u16) -> u8;
    fn write8(&mut self, addr: u16, val: u8);
    fn tick(&mut self) -> u32;
    fn interrupts(&mut self) -> &mut Interrupts;

    /// Reset the divider, as STOP does.
    fn reset_divider(&mut self) {}

    /// Perform an armed speed switch. Returns false when none was armed.
    fn switch_speed(&mut self) -> bool {
        false
    }

    /// True while a selected joypad line reads low.
    fn joypad_line_low(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuState {
    #[default]
    Running,
    Halted,
    Stopped,
    /// Entered by an undefined opcode. Only a reset leaves it.
    Locked,
}

#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub ime: bool,
    state: CpuState,
    halt_bug: bool,
    ime_enable_delay: u8,
    step_dots: u32,
}

impl Cpu {
    /// Power-on state, for executing a boot ROM from 0x0000.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register state the boot ROM leaves behind for the selected hardware.
    pub fn post_boot(mode: HardwareMode, dmg_cartridge: bool) -> Self {
        let (af, bc, de, hl) = match mode {
            HardwareMode::Dmg => (DMG_BOOT_AF, DMG_BOOT_BC, DMG_BOOT_DE, DMG_BOOT_HL),
            HardwareMode::Cgb if dmg_cartridge => {
                (CGB_BOOT_AF, CGB_BOOT_BC, CGB_DMG_BOOT_DE, CGB_DMG_BOOT_HL)
            }
            HardwareMode::Cgb => (CGB_BOOT_AF, CGB_BOOT_BC, CGB_BOOT_DE, CGB_BOOT_HL),
        };
        let mut cpu = Self::new();
        cpu.set_af(af);
        cpu.set_bc(bc);
        cpu.set_de(de);
        cpu.set_hl(hl);
        cpu.sp = BOOT_SP;
        cpu.pc = BOOT_PC;
        cpu
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f])
    }

    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    /// The low nibble of F always reads zero.
    pub fn set_af(&mut self, val: u16) {
        let [a, f] = val.to_be_bytes();
        self.a = a;
        self.f = f & 0xF0;
    }

    pub fn set_bc(&mut self, val: u16) {
        [self.b, self.c] = val.to_be_bytes();
    }

    pub fn set_de(&mut self, val: u16) {
        [self.d, self.e] = val.to_be_bytes();
    }

    pub fn set_hl(&mut self, val: u16) {
        [self.h, self.l] = val.to_be_bytes();
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X}",
            self.af(),
            self.bc(),
            self.de(),
            self.hl(),
            self.pc,
            self.sp
        )
    }

    /// Execute one instruction, or one idle M-cycle while halted or locked,
    /// then dispatch a pending interrupt if enabled. Returns the dots that
    /// elapsed on the bus.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        self.step_dots = 0;
        match self.state {
            CpuState::Locked => {
                self.tick(bus);
                return self.step_dots;
            }
            CpuState::Stopped => {
                if !bus.joypad_line_low() {
                    return IDLE_STEP_DOTS;
                }
                self.state = CpuState::Running;
            }
            CpuState::Halted => {
                self.tick(bus);
                self.service_interrupts(bus);
                return self.step_dots;
            }
            CpuState::Running => {}
        }

        let enable_after = self.ime_enable_delay == 1;
        let pc = self.pc;
        let byte = if self.halt_bug {
            // The byte after HALT is read without advancing PC.
            self.halt_bug = false;
            self.read8(bus, self.pc)
        } else {
            self.fetch8(bus)
        };
        let op = OPCODES[byte as usize].op;

        #[cfg(feature = "cpu-trace")]
        log::trace!("{pc:04X}  {byte:02X}  {op}  {}", self.debug_state());

        self.execute(bus, op);

        if self.state == CpuState::Locked {
            warn!("undefined opcode {byte:02X} at {pc:04X}, CPU locked");
            return self.step_dots;
        }

        if enable_after && self.ime_enable_delay > 0 {
            self.ime = true;
        }
        if self.ime_enable_delay > 0 {
            self.ime_enable_delay -= 1;
        }
        self.service_interrupts(bus);
        self.step_dots
    }

    #[inline]
    fn tick<B: Bus>(&mut self, bus: &mut B) {
        self.step_dots += bus.tick();
    }

    #[inline]
    fn read8<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let val = bus.read8(addr);
        self.tick(bus);
        val
    }

    #[inline]
    fn write8<B: Bus>(&mut self, bus: &mut B, addr: u16, val: u8) {
        bus.write8(addr, val);
        self.tick(bus);
    }

    #[inline]
    fn fetch8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let val = self.read8(bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    #[inline]
    fn fetch16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch8(bus);
        let hi = self.fetch8(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn push16<B: Bus>(&mut self, bus: &mut B, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, hi);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, lo);
    }

    fn pop16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read8(bus, self.sp);
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(bus, self.sp);
        self.sp = self.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    fn read_r8<B: Bus>(&mut self, bus: &mut B, r: R8) -> u8 {
        match r {
            R8::B => self.b,
            R8::C => self.c,
            R8::D => self.d,
            R8::E => self.e,
            R8::H => self.h,
            R8::L => self.l,
            R8::HlInd => self.read8(bus, self.hl()),
            R8::A => self.a,
        }
    }

    fn write_r8<B: Bus>(&mut self, bus: &mut B, r: R8, val: u8) {
        match r {
            R8::B => self.b = val,
            R8::C => self.c = val,
            R8::D => self.d = val,
            R8::E => self.e = val,
            R8::H => self.h = val,
            R8::L => self.l = val,
            R8::HlInd => self.write8(bus, self.hl(), val),
            R8::A => self.a = val,
        }
    }

    fn r16(&self, rr: R16) -> u16 {
        match rr {
            R16::Bc => self.bc(),
            R16::De => self.de(),
            R16::Hl => self.hl(),
            R16::Sp => self.sp,
        }
    }

    fn set_r16(&mut self, rr: R16, val: u16) {
        match rr {
            R16::Bc => self.set_bc(val),
            R16::De => self.set_de(val),
            R16::Hl => self.set_hl(val),
            R16::Sp => self.sp = val,
        }
    }

    fn r16_stack(&self, rr: R16Stack) -> u16 {
        match rr {
            R16Stack::Bc => self.bc(),
            R16Stack::De => self.de(),
            R16Stack::Hl => self.hl(),
            R16Stack::Af => self.af(),
        }
    }

    fn set_r16_stack(&mut self, rr: R16Stack, val: u16) {
        match rr {
            R16Stack::Bc => self.set_bc(val),
            R16Stack::De => self.set_de(val),
            R16Stack::Hl => self.set_hl(val),
            R16Stack::Af => self.set_af(val),
        }
    }

    /// Address of an indirect operand, applying the HL post-increment.
    fn indirect(&mut self, m: R16Mem) -> u16 {
        match m {
            R16Mem::Bc => self.bc(),
            R16Mem::De => self.de(),
            R16Mem::HlInc => {
                let hl = self.hl();
                self.set_hl(hl.wrapping_add(1));
                hl
            }
            R16Mem::HlDec => {
                let hl = self.hl();
                self.set_hl(hl.wrapping_sub(1));
                hl
            }
        }
    }

    fn condition(&self, cond: Option<Cond>) -> bool {
        match cond {
            None => true,
            Some(Cond::Nz) => self.f & FLAG_Z == 0,
            Some(Cond::Z) => self.f & FLAG_Z != 0,
            Some(Cond::Nc) => self.f & FLAG_C == 0,
            Some(Cond::C) => self.f & FLAG_C != 0,
        }
    }

    fn rotate_a(&mut self, op: ShiftOp) {
        (self.a, self.f) = alu::rotate_a(op, self.a, self.f);
    }

    fn halt<B: Bus>(&mut self, bus: &mut B) {
        let pending = bus.interrupts().pending() != 0;
        if self.ime || !pending || self.ime_enable_delay > 0 {
            self.state = CpuState::Halted;
        } else {
            self.halt_bug = true;
        }
    }

    fn stop<B: Bus>(&mut self, bus: &mut B) {
        // STOP is two bytes long; the second is skipped without a bus access.
        self.pc = self.pc.wrapping_add(1);
        if bus.switch_speed() {
            return;
        }
        bus.reset_divider();
        if !bus.joypad_line_low() {
            self.state = CpuState::Stopped;
        }
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match op {
            Op::Nop => {}
            Op::Stop => self.stop(bus),
            Op::Halt => self.halt(bus),
            Op::Di => {
                self.ime = false;
                self.ime_enable_delay = 0;
            }
            Op::Ei => self.ime_enable_delay = 2,
            Op::Ld8 { dst, src } => {
                let val = self.read_r8(bus, src);
                self.write_r8(bus, dst, val);
            }
            Op::Ld8Imm(r) => {
                let val = self.fetch8(bus);
                self.write_r8(bus, r, val);
            }
            Op::Ld16Imm(rr) => {
                let val = self.fetch16(bus);
                self.set_r16(rr, val);
            }
            Op::LdMemA(m) => {
                let addr = self.indirect(m);
                self.write8(bus, addr, self.a);
            }
            Op::LdAMem(m) => {
                let addr = self.indirect(m);
                self.a = self.read8(bus, addr);
            }
            Op::LdAbsSp => {
                let addr = self.fetch16(bus);
                let [hi, lo] = self.sp.to_be_bytes();
                self.write8(bus, addr, lo);
                self.write8(bus, addr.wrapping_add(1), hi);
            }
            Op::LdAbsA => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.a);
            }
            Op::LdAAbs => {
                let addr = self.fetch16(bus);
                self.a = self.read8(bus, addr);
            }
            Op::LdhImmA => {
                let offset = self.fetch8(bus);
                self.write8(bus, 0xFF00 | offset as u16, self.a);
            }
            Op::LdhAImm => {
                let offset = self.fetch8(bus);
                self.a = self.read8(bus, 0xFF00 | offset as u16);
            }
            Op::LdhCA => self.write8(bus, 0xFF00 | self.c as u16, self.a),
            Op::LdhAC => self.a = self.read8(bus, 0xFF00 | self.c as u16),
            Op::LdHlSpOffset => {
                let offset = self.fetch8(bus) as i8;
                let (val, f) = alu::add_sp(self.sp, offset);
                self.set_hl(val);
                self.f = f;
                self.tick(bus);
            }
            Op::LdSpHl => {
                self.sp = self.hl();
                self.tick(bus);
            }
            Op::Inc8(r) => {
                let val = self.read_r8(bus, r);
                let (res, f) = alu::inc(val, self.f);
                self.f = f;
                self.write_r8(bus, r, res);
            }
            Op::Dec8(r) => {
                let val = self.read_r8(bus, r);
                let (res, f) = alu::dec(val, self.f);
                self.f = f;
                self.write_r8(bus, r, res);
            }
            Op::Inc16(rr) => {
                self.set_r16(rr, self.r16(rr).wrapping_add(1));
                self.tick(bus);
            }
            Op::Dec16(rr) => {
                self.set_r16(rr, self.r16(rr).wrapping_sub(1));
                self.tick(bus);
            }
            Op::AddHl(rr) => {
                let (val, f) = alu::add16(self.hl(), self.r16(rr), self.f);
                self.set_hl(val);
                self.f = f;
                self.tick(bus);
            }
            Op::AddSpOffset => {
                let offset = self.fetch8(bus) as i8;
                (self.sp, self.f) = alu::add_sp(self.sp, offset);
                self.tick(bus);
                self.tick(bus);
            }
            Op::Alu(op, r) => {
                let val = self.read_r8(bus, r);
                (self.a, self.f) = alu::alu(op, self.a, val, self.f);
            }
            Op::AluImm(op) => {
                let val = self.fetch8(bus);
                (self.a, self.f) = alu::alu(op, self.a, val, self.f);
            }
            Op::Rlca => self.rotate_a(ShiftOp::Rlc),
            Op::Rrca => self.rotate_a(ShiftOp::Rrc),
            Op::Rla => self.rotate_a(ShiftOp::Rl),
            Op::Rra => self.rotate_a(ShiftOp::Rr),
            Op::Daa => (self.a, self.f) = alu::daa(self.a, self.f),
            Op::Cpl => (self.a, self.f) = alu::cpl(self.a, self.f),
            Op::Scf => self.f = alu::scf(self.f),
            Op::Ccf => self.f = alu::ccf(self.f),
            Op::Jr(cond) => {
                let offset = self.fetch8(bus) as i8;
                if self.condition(cond) {
                    self.pc = self.pc.wrapping_add_signed(offset as i16);
                    self.tick(bus);
                }
            }
            Op::Jp(cond) => {
                let addr = self.fetch16(bus);
                if self.condition(cond) {
                    self.pc = addr;
                    self.tick(bus);
                }
            }
            Op::JpHl => self.pc = self.hl(),
            Op::Call(cond) => {
                let addr = self.fetch16(bus);
                if self.condition(cond) {
                    self.tick(bus);
                    self.push16(bus, self.pc);
                    self.pc = addr;
                }
            }
            Op::Ret(None) => {
                self.pc = self.pop16(bus);
                self.tick(bus);
            }
            Op::Ret(cond) => {
                self.tick(bus);
                if self.condition(cond) {
                    self.pc = self.pop16(bus);
                    self.tick(bus);
                }
            }
            Op::Reti => {
                self.pc = self.pop16(bus);
                self.tick(bus);
                self.ime = true;
            }
            Op::Rst(vector) => {
                self.tick(bus);
                self.push16(bus, self.pc);
                self.pc = vector as u16;
            }
            Op::Push(rr) => {
                self.tick(bus);
                self.push16(bus, self.r16_stack(rr));
            }
            Op::Pop(rr) => {
                let val = self.pop16(bus);
                self.set_r16_stack(rr, val);
            }
            Op::Prefix => {
                let byte = self.fetch8(bus);
                self.execute(bus, CB_OPCODES[byte as usize].op);
            }
            Op::Shift(op, r) => {
                let val = self.read_r8(bus, r);
                let (res, f) = alu::shift(op, val, self.f);
                self.f = f;
                self.write_r8(bus, r, res);
            }
            Op::Bit(bit, r) => {
                let val = self.read_r8(bus, r);
                self.f = alu::bit(bit, val, self.f);
            }
            Op::Res(bit, r) => {
                let val = self.read_r8(bus, r);
                self.write_r8(bus, r, val & !(1 << bit));
            }
            Op::Set(bit, r) => {
                let val = self.read_r8(bus, r);
                self.write_r8(bus, r, val | (1 << bit));
            }
            Op::Illegal => self.state = CpuState::Locked,
        }
    }

    /// Wake from HALT on any pending source and dispatch it when IME is set.
    fn service_interrupts<B: Bus>(&mut self, bus: &mut B) {
        if matches!(self.state, CpuState::Stopped | CpuState::Locked) {
            return;
        }
        if bus.interrupts().pending() == 0 {
            return;
        }
        self.state = CpuState::Running;
        if self.ime {
            self.dispatch(bus);
        }
    }

    /// Interrupt entry: two idle M-cycles, PC pushed, jump. The pending set is
    /// sampled again after the high byte is pushed, because that push may hit
    /// IE. When nothing is left to service, execution continues at 0x0000.
    fn dispatch<B: Bus>(&mut self, bus: &mut B) {
        self.ime = false;
        self.tick(bus);
        self.tick(bus);

        let [hi, lo] = self.pc.to_be_bytes();
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, hi);

        let source = bus.interrupts().take();

        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, lo);

        self.pc = source.map_or(0x0000, |s| s.vector());
        self.tick(bus);
    }
}
