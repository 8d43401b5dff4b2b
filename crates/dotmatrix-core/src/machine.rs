use log::{debug, info};

use crate::{
    cartridge::{Cartridge, CartridgeHeader},
    cpu::{Cpu, CpuState},
    error::LoadError,
    hardware::HardwareMode,
    input::Button,
    mmu::Mmu,
    ppu::{CompatibilityPalettes, DOTS_PER_FRAME, FRAME_PIXELS},
};

/// Upper bound on the dots a single `run_frame` call may emulate.
const MAX_FRAME_DOTS: u64 = 2 * DOTS_PER_FRAME as u64;

/// A complete console: CPU plus the bus that owns every other component.
pub struct Machine {
    cpu: Cpu,
    mmu: Mmu,
    mode: HardwareMode,
    /// Dots emulated since the last load or reset.
    cycles: u64,
    loaded: bool,
}

impl Machine {
    /// An unloaded machine. `run_frame` does nothing until `load` succeeds.
    pub fn new(mode: HardwareMode) -> Self {
        Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(mode),
            mode,
            cycles: 0,
            loaded: false,
        }
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Reset all state and insert a cartridge. With a boot image the CPU
    /// starts at 0x0000 with the image mapped; without one it starts at
    /// 0x0100 in the state the boot ROM would have left.
    ///
    /// On error the machine is left unloaded.
    pub fn load(&mut self, boot: Option<&[u8]>, cartridge: &[u8]) -> Result<(), LoadError> {
        self.unload();

        if let Some(boot) = boot
            && boot.len() != self.mode.boot_rom_len()
        {
            return Err(LoadError::InvalidBootRom {
                len: boot.len(),
                expected: self.mode.boot_rom_len(),
            });
        }

        let cart = Cartridge::from_bytes(cartridge)?;
        let header = cart.header();
        info!(
            "loaded \"{}\": {}, {} ROM banks, {} bytes RAM, CGB flag {:#04x}",
            header.title,
            header.controller,
            cart.rom_bank_count(),
            header.ram_size,
            header.cgb_flag
        );

        let compat = self.compatibility_palettes(header);
        match boot {
            Some(boot) => {
                self.mmu = Mmu::new(self.mode);
                self.mmu.map_boot_rom(boot.to_vec());
                self.cpu = Cpu::new();
            }
            None => {
                self.mmu = Mmu::post_boot(self.mode, compat.as_ref());
                self.cpu = Cpu::post_boot(self.mode, compat.is_some());
            }
        }
        self.mmu.load_cart(cart);
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.cpu = Cpu::new();
        self.mmu = Mmu::new(self.mode);
        self.cycles = 0;
        self.loaded = false;
    }

    /// Palettes for a monochrome-only cartridge on color hardware, or None
    /// when the cartridge runs natively.
    fn compatibility_palettes(&self, header: &CartridgeHeader) -> Option<CompatibilityPalettes> {
        (self.mode.is_cgb() && !header.supports_cgb())
            .then(|| CompatibilityPalettes::for_header(header))
    }

    /// Restart the loaded cartridge from the post-boot state. Bank registers
    /// return to their power-on values; external RAM is kept.
    pub fn reset(&mut self) {
        let Some(mut cart) = self.mmu.cart.take() else {
            return;
        };
        cart.reset_banking();
        let compat = self.compatibility_palettes(cart.header());
        self.mmu = Mmu::post_boot(self.mode, compat.as_ref());
        self.mmu.load_cart(cart);
        self.cpu = Cpu::post_boot(self.mode, compat.is_some());
        self.cycles = 0;
        debug!("machine reset");
    }

    /// Execute one CPU step. Returns the dots that elapsed.
    pub fn step(&mut self) -> u32 {
        if !self.loaded {
            return 0;
        }
        let dots = self.cpu.step(&mut self.mmu);
        self.cycles += dots as u64;
        dots
    }

    /// Run until the pixel unit enters VBlank. With the LCD off, or the CPU
    /// stopped or locked, one frame's worth of dots is emulated instead.
    pub fn run_frame(&mut self) {
        if !self.loaded {
            return;
        }
        let start = self.mmu.ppu.frames();
        let mut elapsed = 0u64;
        while self.mmu.ppu.frames() == start && elapsed < MAX_FRAME_DOTS {
            elapsed += self.step() as u64;
            if elapsed >= DOTS_PER_FRAME as u64 && self.frame_cannot_complete() {
                break;
            }
        }
    }

    fn frame_cannot_complete(&self) -> bool {
        !self.mmu.ppu.lcd_enabled()
            || matches!(self.cpu.state(), CpuState::Stopped | CpuState::Locked)
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.set_button(button, pressed);
    }

    /// The last completed frame as packed `0xRRGGBBAA` pixels, row-major.
    pub fn read_frame(&self) -> &[u32; FRAME_PIXELS] {
        self.mmu.ppu.framebuffer()
    }

    /// Copy the frame into `out` as R, G, B, A bytes. Copies as many whole
    /// pixels as fit.
    pub fn copy_frame_rgba8888(&self, out: &mut [u8]) {
        for (dst, &pixel) in out.chunks_exact_mut(4).zip(self.read_frame().iter()) {
            dst.copy_from_slice(&pixel.to_be_bytes());
        }
    }

    /// Dots emulated since the last load or reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// VBlank entries since the last load or reset.
    pub fn frames(&self) -> u64 {
        self.mmu.ppu.frames()
    }

    pub fn header(&self) -> Option<&CartridgeHeader> {
        self.mmu.cart.as_ref().map(Cartridge::header)
    }

    /// External cartridge RAM, for a host that persists saves.
    pub fn cartridge_ram(&self) -> Option<&[u8]> {
        self.mmu
            .cart
            .as_ref()
            .map(Cartridge::ram)
            .filter(|ram| !ram.is_empty())
    }

    /// Restore external RAM from a snapshot. Returns false when no cartridge
    /// is loaded or the snapshot size does not match.
    pub fn load_cartridge_ram(&mut self, data: &[u8]) -> bool {
        self.mmu
            .cart
            .as_mut()
            .is_some_and(|cart| cart.load_ram(data))
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(HardwareMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::HEADER_END;

    fn loop_rom() -> Vec<u8> {
        let mut rom = vec![0; 0x8000];
        rom[0x100] = 0x18;
        rom[0x101] = 0xFE;
        rom[0x14D] = crate::cartridge::header_checksum(&rom);
        assert!(rom.len() > HEADER_END);
        rom
    }

    #[test]
    fn unloaded_machine_does_nothing() {
        let mut machine = Machine::new(HardwareMode::Dmg);
        machine.run_frame();
        assert_eq!(machine.cycles(), 0);
        assert!(!machine.is_loaded());
        assert!(machine.header().is_none());
    }

    #[test]
    fn boot_image_length_is_checked() {
        let mut machine = Machine::new(HardwareMode::Cgb);
        let err = machine.load(Some(&[0; 0x100]), &loop_rom()).unwrap_err();
        assert_eq!(
            err,
            LoadError::InvalidBootRom {
                len: 0x100,
                expected: 0x900
            }
        );
        assert!(!machine.is_loaded());
    }

    #[test]
    fn boot_image_starts_at_zero() {
        let mut machine = Machine::new(HardwareMode::Dmg);
        machine.load(Some(&[0; 0x100]), &loop_rom()).unwrap();
        assert_eq!(machine.cpu().pc, 0x0000);
        assert!(machine.mmu().boot_rom_mapped());
    }

    #[test]
    fn rgba_bytes_are_big_endian() {
        let mut machine = Machine::new(HardwareMode::Dmg);
        machine.load(None, &loop_rom()).unwrap();
        machine.run_frame();
        let mut bytes = vec![0; FRAME_PIXELS * 4];
        machine.copy_frame_rgba8888(&mut bytes);
        assert_eq!(&bytes[..4], &[0x9B, 0xBC, 0x0F, 0xFF]);
    }
}
