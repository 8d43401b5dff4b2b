/// Interrupt sources in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interrupt {
    VBlank = 0,
    Stat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    /// Bit of this source in IF and IE.
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Address the CPU jumps to when servicing this source.
    pub const fn vector(self) -> u16 {
        0x40 + 8 * self as u16
    }
}

const IF_UNUSED: u8 = 0xE0;
const SOURCE_MASK: u8 = 0x1F;

/// IF (FF0F) and IE (FFFF) registers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Interrupts {
    flags: u8,
    enable: u8,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, source: Interrupt) {
        self.flags |= source.bit();
    }

    pub fn clear(&mut self, source: Interrupt) {
        self.flags &= !source.bit();
    }

    pub fn is_requested(&self, source: Interrupt) -> bool {
        self.flags & source.bit() != 0
    }

    /// Sources that are both requested and enabled.
    pub fn pending(&self) -> u8 {
        self.flags & self.enable & SOURCE_MASK
    }

    pub fn highest_pending(&self) -> Option<Interrupt> {
        let pending = self.pending();
        Interrupt::ALL
            .into_iter()
            .find(|source| pending & source.bit() != 0)
    }

    /// Acknowledge the highest priority pending source, clearing its request bit.
    pub fn take(&mut self) -> Option<Interrupt> {
        let source = self.highest_pending()?;
        self.clear(source);
        Some(source)
    }

    pub fn read_flags(&self) -> u8 {
        self.flags | IF_UNUSED
    }

    pub fn write_flags(&mut self, value: u8) {
        self.flags = value & SOURCE_MASK;
    }

    pub fn read_enable(&self) -> u8 {
        self.enable
    }

    pub fn write_enable(&mut self, value: u8) {
        self.enable = value;
    }
}
