#![allow(dead_code)]

use dotmatrix_core::{Machine, cartridge::header_checksum, hardware::HardwareMode};
use once_cell::sync::{Lazy, OnceCell};

static LOGGER: OnceCell<()> = OnceCell::new();

/// Route `log` output through the test harness.
pub fn init_logger() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Builds cartridge images with a valid header around a program at 0x0100.
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    /// A 32 KiB image without a bank controller.
    pub fn new() -> Self {
        Self::sized(0x00, 2)
    }

    /// An image of `banks` 16 KiB banks declaring `rom_size_code`.
    pub fn sized(rom_size_code: u8, banks: usize) -> Self {
        let mut rom = vec![0; banks * 0x4000];
        rom[0x0148] = rom_size_code;
        Self { rom }
    }

    pub fn title(mut self, title: &str) -> Self {
        for (dst, src) in self.rom[0x0134..0x0143].iter_mut().zip(title.bytes()) {
            *dst = src;
        }
        self
    }

    pub fn cartridge_type(mut self, code: u8) -> Self {
        self.rom[0x0147] = code;
        self
    }

    pub fn ram_size(mut self, code: u8) -> Self {
        self.rom[0x0149] = code;
        self
    }

    /// Old licensee code at 0x014B.
    pub fn licensee(mut self, code: u8) -> Self {
        self.rom[0x014B] = code;
        self
    }

    pub fn cgb_flag(mut self, flag: u8) -> Self {
        self.rom[0x0143] = flag;
        self
    }

    /// Place `code` at `addr`.
    pub fn code_at(mut self, addr: usize, code: &[u8]) -> Self {
        self.rom[addr..addr + code.len()].copy_from_slice(code);
        self
    }

    /// Entry point program at 0x0100.
    pub fn program(self, code: &[u8]) -> Self {
        self.code_at(0x0100, code)
    }

    /// Mark each switchable bank with its own index in its first byte.
    pub fn tag_banks(mut self) -> Self {
        for bank in 1..self.rom.len() / 0x4000 {
            self.rom[bank * 0x4000] = bank as u8;
        }
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x014D] = header_checksum(&self.rom);
        self.rom
    }
}

/// `JR -2` at the entry point: spins forever without touching I/O.
pub static SPIN_ROM: Lazy<Vec<u8>> =
    Lazy::new(|| RomBuilder::new().title("SPIN").program(&[0x18, 0xFE]).build());

/// Enables the joypad interrupt with IME clear, selects the direction group,
/// clears IF, then spins.
pub static JOYPAD_ROM: Lazy<Vec<u8>> = Lazy::new(|| {
    RomBuilder::new()
        .title("JOYPAD")
        .program(&[
            0xF3, // DI
            0x3E, 0x10, // LD A,$10
            0xE0, 0xFF, // LDH ($FF),A   IE = joypad
            0x3E, 0x20, // LD A,$20
            0xE0, 0x00, // LDH ($00),A   select directions
            0xAF, // XOR A
            0xE0, 0x0F, // LDH ($0F),A   clear IF
            0x18, 0xFE, // JR -2
        ])
        .build()
});

/// A machine with `rom` loaded and no boot image.
pub fn machine_with(mode: HardwareMode, rom: &[u8]) -> Machine {
    init_logger();
    let mut machine = Machine::new(mode);
    if let Err(err) = machine.load(None, rom) {
        panic!("failed to load test ROM: {err}");
    }
    machine
}
