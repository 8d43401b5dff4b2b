use log::debug;

use crate::{
    cartridge::Cartridge,
    cpu::Bus,
    hardware::HardwareMode,
    input::{Button, Input},
    interrupts::Interrupts,
    ppu::{CompatibilityPalettes, OAM_SIZE, Ppu},
    serial::Serial,
    sound::Sound,
    timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;
const HRAM_SIZE: usize = 0x7F;

/// CPU cycles the timer and serial port see per M-cycle, at either speed.
const CPU_CYCLES_PER_M_CYCLE: u32 = 4;
/// M-cycles between the FF46 write and the first byte copied.
const OAM_DMA_START_DELAY: u8 = 2;
/// M-cycles the CPU idles after a speed switch.
const SPEED_SWITCH_STALL: u32 = 2050;

/// What a 256-byte page of the address space is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    CartRom,
    Vram,
    CartRam,
    WramFixed,
    WramBanked,
    /// FE00-FEFF: OAM followed by the unusable gap.
    Oam,
    /// FF00-FFFF: I/O ports, HRAM and IE.
    High,
}

/// Device behind each FF00-FF7F port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Port {
    Unmapped,
    Joypad,
    Serial,
    Timer,
    InterruptFlag,
    Sound,
    Lcd,
    OamDma,
    Key0,
    Key1,
    VramBank,
    BootRom,
    Hdma,
    WramBank,
}

fn build_pages() -> [Region; 256] {
    let mut pages = [Region::High; 256];
    for (page, region) in pages.iter_mut().enumerate() {
        *region = match page {
            0x00..=0x7F => Region::CartRom,
            0x80..=0x9F => Region::Vram,
            0xA0..=0xBF => Region::CartRam,
            0xC0..=0xCF | 0xE0..=0xEF => Region::WramFixed,
            0xD0..=0xDF | 0xF0..=0xFD => Region::WramBanked,
            0xFE => Region::Oam,
            _ => Region::High,
        };
    }
    pages
}

fn build_ports(mode: HardwareMode) -> [Port; 0x80] {
    let mut ports = [Port::Unmapped; 0x80];
    for (offset, port) in ports.iter_mut().enumerate() {
        *port = match offset {
            0x00 => Port::Joypad,
            0x01 | 0x02 => Port::Serial,
            0x04..=0x07 => Port::Timer,
            0x0F => Port::InterruptFlag,
            0x10..=0x3F => Port::Sound,
            0x40..=0x45 | 0x47..=0x4B => Port::Lcd,
            0x46 => Port::OamDma,
            0x50 => Port::BootRom,
            _ => Port::Unmapped,
        };
    }
    if mode.is_cgb() {
        ports[0x4C] = Port::Key0;
        ports[0x4D] = Port::Key1;
        ports[0x4F] = Port::VramBank;
        for port in &mut ports[0x51..=0x55] {
            *port = Port::Hdma;
        }
        for port in &mut ports[0x68..=0x6C] {
            *port = Port::Lcd;
        }
        ports[0x70] = Port::WramBank;
    }
    ports
}

#[derive(Debug, Clone, Copy)]
struct OamDma {
    source: u16,
    index: u16,
    delay: u8,
}

/// Transfer mode for color VRAM DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaMode {
    /// General DMA (immediate)
    Gdma,
    /// HBlank DMA
    Hdma,
}

#[derive(Debug)]
struct HdmaState {
    /// 16-bit source pointer (lower 4 bits ignored)
    src: u16,
    /// Destination in VRAM (0x8000 | (dst & 0x1FF0))
    dst: u16,
    /// Remaining 0x10-byte blocks
    blocks: u8,
    mode: DmaMode,
    active: bool,
}

pub struct Mmu {
    mode: HardwareMode,
    pages: [Region; 256],
    ports: [Port; 0x80],
    wram: Vec<[u8; WRAM_BANK_SIZE]>,
    wram_bank: usize,
    hram: [u8; HRAM_SIZE],
    pub cart: Option<Cartridge>,
    boot_rom: Option<Vec<u8>>,
    boot_mapped: bool,
    pub interrupts: Interrupts,
    pub timer: Timer,
    pub ppu: Ppu,
    pub input: Input,
    pub serial: Serial,
    pub sound: Sound,
    key1: u8,
    dma_reg: u8,
    oam_dma: Option<OamDma>,
    hdma: HdmaState,
    /// M-cycles the CPU must idle before its next access completes.
    stall_m_cycles: u32,
}

impl Mmu {
    /// Bus as found at power-on, before a boot ROM has run.
    pub fn new(mode: HardwareMode) -> Self {
        Self {
            mode,
            pages: build_pages(),
            ports: build_ports(mode),
            wram: vec![[0; WRAM_BANK_SIZE]; mode.wram_banks()],
            wram_bank: 1,
            hram: [0; HRAM_SIZE],
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            interrupts: Interrupts::new(),
            timer: Timer::new(),
            ppu: Ppu::new(mode.is_cgb()),
            input: Input::new(),
            serial: Serial::new(mode.is_cgb()),
            sound: Sound::new(),
            key1: 0,
            dma_reg: 0,
            oam_dma: None,
            hdma: HdmaState {
                src: 0,
                dst: Self::sanitize_vram_dma_dest(0),
                blocks: 0,
                mode: DmaMode::Gdma,
                active: false,
            },
            stall_m_cycles: 0,
        }
    }

    /// Bus in the state the boot ROM leaves behind when it jumps to 0x0100.
    /// `compat` selects compatibility rendering with the given palettes on
    /// color hardware.
    pub fn post_boot(mode: HardwareMode, compat: Option<&CompatibilityPalettes>) -> Self {
        let mut mmu = Self::new(mode);
        mmu.timer = Timer::post_boot();
        mmu.input = Input::post_boot();
        mmu.sound = Sound::post_boot();
        mmu.ppu.apply_boot_state(compat);
        mmu.interrupts.write_flags(0xE1);
        mmu.dma_reg = 0xFF;
        mmu
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Overlay a boot image on the low ROM area until FF50 is written.
    pub fn map_boot_rom(&mut self, data: Vec<u8>) {
        debug!("boot ROM mapped ({} bytes)", data.len());
        self.boot_rom = Some(data);
        self.boot_mapped = true;
    }

    pub fn boot_rom_mapped(&self) -> bool {
        self.boot_mapped
    }

    pub fn double_speed(&self) -> bool {
        self.key1 & 0x80 != 0
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.input.set_button(button, pressed, &mut self.interrupts);
    }

    pub fn oam_dma_active(&self) -> bool {
        matches!(self.oam_dma, Some(OamDma { delay: 0, .. }))
    }

    pub fn hdma_active(&self) -> bool {
        self.hdma.active
    }

    fn boot_rom_byte(&self, addr: u16) -> Option<u8> {
        if !self.boot_mapped {
            return None;
        }
        let rom = self.boot_rom.as_ref()?;
        let addr = addr as usize;
        // The color boot image leaves 0100-01FF to the cartridge header.
        let covered = addr < 0x100 || (self.mode.is_cgb() && (0x200..0x900).contains(&addr));
        if covered { rom.get(addr).copied() } else { None }
    }

    /// Side-effect-free read of any address.
    pub fn read_byte(&self, addr: u16) -> u8 {
        match self.pages[(addr >> 8) as usize] {
            Region::CartRom => match self.boot_rom_byte(addr) {
                Some(val) => val,
                None => self.cart.as_ref().map_or(0xFF, |c| c.read(addr)),
            },
            Region::Vram => self.ppu.read_vram(addr),
            Region::CartRam => self.cart.as_ref().map_or(0xFF, |c| c.read(addr)),
            Region::WramFixed => self.wram[0][addr as usize & (WRAM_BANK_SIZE - 1)],
            Region::WramBanked => self.wram[self.wram_bank][addr as usize & (WRAM_BANK_SIZE - 1)],
            Region::Oam => {
                if (addr - 0xFE00) as usize >= OAM_SIZE || self.oam_dma_active() {
                    0xFF
                } else {
                    self.ppu.read_oam(addr)
                }
            }
            Region::High => match addr {
                0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
                0xFFFF => self.interrupts.read_enable(),
                _ => self.read_port(addr),
            },
        }
    }

    fn read_port(&self, addr: u16) -> u8 {
        match self.ports[(addr & 0x7F) as usize] {
            Port::Unmapped | Port::BootRom | Port::Key0 => 0xFF,
            Port::Joypad => self.input.read(),
            Port::Serial => self.serial.read(addr),
            Port::Timer => self.timer.read(addr),
            Port::InterruptFlag => self.interrupts.read_flags(),
            Port::Sound => self.sound.read(addr),
            Port::Lcd => self.ppu.read_reg(addr),
            Port::OamDma => self.dma_reg,
            Port::Key1 => 0x7E | self.key1,
            Port::VramBank => self.ppu.read_vram_bank(),
            Port::Hdma if addr == 0xFF55 => {
                let remaining = self.hdma.blocks.wrapping_sub(1) & 0x7F;
                if self.hdma.active {
                    remaining
                } else {
                    0x80 | remaining
                }
            }
            Port::Hdma => 0xFF,
            Port::WramBank => 0xF8 | self.wram_bank as u8,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match self.pages[(addr >> 8) as usize] {
            Region::CartRom | Region::CartRam => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            Region::Vram => self.ppu.write_vram(addr, val),
            Region::WramFixed => self.wram[0][addr as usize & (WRAM_BANK_SIZE - 1)] = val,
            Region::WramBanked => {
                self.wram[self.wram_bank][addr as usize & (WRAM_BANK_SIZE - 1)] = val
            }
            Region::Oam => {
                if ((addr - 0xFE00) as usize) < OAM_SIZE && !self.oam_dma_active() {
                    self.ppu.write_oam(addr, val);
                }
            }
            Region::High => match addr {
                0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
                0xFFFF => self.interrupts.write_enable(val),
                _ => self.write_port(addr, val),
            },
        }
    }

    fn write_port(&mut self, addr: u16, val: u8) {
        match self.ports[(addr & 0x7F) as usize] {
            Port::Unmapped => {}
            Port::Joypad => self.input.write(val, &mut self.interrupts),
            Port::Serial => self.serial.write(addr, val),
            Port::Timer => self.timer.write(addr, val, &mut self.interrupts),
            Port::InterruptFlag => self.interrupts.write_flags(val),
            Port::Sound => self.sound.write(addr, val),
            Port::Lcd => self.ppu.write_reg(addr, val),
            Port::OamDma => self.start_oam_dma(val),
            Port::Key0 => {
                // Only the boot ROM can switch the PPU to monochrome output.
                if self.boot_mapped && val & 0x04 != 0 {
                    debug!("PPU switched to monochrome compatibility output");
                    self.ppu.enter_compatibility_mode();
                }
            }
            Port::Key1 => self.key1 = (self.key1 & 0x80) | (val & 0x01),
            Port::VramBank => self.ppu.write_vram_bank(val),
            Port::BootRom => {
                if self.boot_mapped {
                    debug!("boot ROM unmapped");
                }
                self.boot_mapped = false;
            }
            Port::Hdma => self.write_hdma(addr, val),
            Port::WramBank => {
                let bank = (val & 0x07) as usize;
                self.wram_bank = bank.max(1);
            }
        }
    }

    fn start_oam_dma(&mut self, val: u8) {
        self.dma_reg = val;
        // Sources above DFFF read work RAM through the echo wiring.
        let page = if val >= 0xE0 { val - 0x20 } else { val };
        let source = (page as u16) << 8;
        debug!("OAM DMA from {source:#06x}");
        self.oam_dma = Some(OamDma {
            source,
            index: 0,
            delay: OAM_DMA_START_DELAY,
        });
    }

    fn step_oam_dma(&mut self) {
        let Some(mut dma) = self.oam_dma else {
            return;
        };
        if dma.delay > 0 {
            dma.delay -= 1;
            self.oam_dma = Some(dma);
            return;
        }
        let byte = self.dma_read_byte(dma.source.wrapping_add(dma.index));
        self.ppu.oam[dma.index as usize] = byte;
        dma.index += 1;
        self.oam_dma = if (dma.index as usize) < OAM_SIZE {
            Some(dma)
        } else {
            None
        };
    }

    /// Read on behalf of a DMA engine, ignoring the OAM lock.
    fn dma_read_byte(&self, addr: u16) -> u8 {
        match self.pages[(addr >> 8) as usize] {
            Region::Oam | Region::High => 0xFF,
            _ => self.read_byte(addr),
        }
    }

    #[inline]
    fn sanitize_vram_dma_dest(addr: u16) -> u16 {
        0x8000 | (addr & 0x1FF0)
    }

    fn write_hdma(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF51 => self.hdma.src = (self.hdma.src & 0x00FF) | ((val as u16) << 8),
            0xFF52 => self.hdma.src = (self.hdma.src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 => {
                self.hdma.dst =
                    Self::sanitize_vram_dma_dest((self.hdma.dst & 0x00FF) | ((val as u16) << 8))
            }
            0xFF54 => {
                self.hdma.dst =
                    Self::sanitize_vram_dma_dest((self.hdma.dst & 0xFF00) | val as u16)
            }
            0xFF55 => {
                if self.hdma.active && val & 0x80 == 0 {
                    debug!("HBlank DMA cancelled, {} blocks left", self.hdma.blocks);
                    self.hdma.active = false;
                    return;
                }
                let blocks = (val & 0x7F) + 1;
                if val & 0x80 == 0 {
                    self.start_gdma(blocks);
                } else {
                    debug!(
                        "HBlank DMA {:#06x} -> {:#06x}, {} blocks",
                        self.hdma.src, self.hdma.dst, blocks
                    );
                    self.hdma.blocks = blocks;
                    self.hdma.mode = DmaMode::Hdma;
                    self.hdma.active = true;
                    if !self.ppu.lcd_enabled() {
                        self.perform_hdma_block();
                    }
                }
            }
            _ => {}
        }
    }

    /// Write to VRAM bypassing mode checks (used by DMA transfers)
    fn vram_dma_write(&mut self, addr: u16, val: u8) {
        self.ppu.vram[self.ppu.vram_bank][(addr & 0x1FFF) as usize] = val;
    }

    fn copy_hdma_block(&mut self) {
        for _ in 0..0x10 {
            let byte = self.dma_read_byte(self.hdma.src);
            self.vram_dma_write(self.hdma.dst, byte);
            self.hdma.src = self.hdma.src.wrapping_add(1);
            self.hdma.dst = 0x8000 | (self.hdma.dst.wrapping_add(1) & 0x1FFF);
        }
        self.stall_m_cycles += self.hdma_block_cycle_cost();
    }

    /// Perform a General DMA transfer immediately; the CPU is stalled for its duration.
    fn start_gdma(&mut self, blocks: u8) {
        debug!(
            "general DMA {:#06x} -> {:#06x}, {} blocks",
            self.hdma.src, self.hdma.dst, blocks
        );
        self.hdma.mode = DmaMode::Gdma;
        for _ in 0..blocks {
            self.copy_hdma_block();
        }
        self.hdma.dst = Self::sanitize_vram_dma_dest(self.hdma.dst);
        self.hdma.active = false;
        self.hdma.blocks = 0;
    }

    /// Execute a single 0x10-byte HDMA burst during H-Blank.
    fn hdma_hblank_transfer(&mut self) {
        if self.hdma.active && self.hdma.mode == DmaMode::Hdma {
            self.perform_hdma_block();
        }
    }

    fn perform_hdma_block(&mut self) {
        self.copy_hdma_block();
        self.hdma.blocks = self.hdma.blocks.saturating_sub(1);
        if self.hdma.blocks == 0 {
            self.hdma.active = false;
        }
        self.hdma.dst = Self::sanitize_vram_dma_dest(self.hdma.dst);
    }

    fn hdma_block_cycle_cost(&self) -> u32 {
        if self.double_speed() { 16 } else { 8 }
    }

    /// Toggle CPU speed if KEY1 is armed. Called by STOP.
    pub fn switch_speed(&mut self) -> bool {
        if !self.mode.is_cgb() || self.key1 & 0x01 == 0 {
            return false;
        }
        self.key1 = (self.key1 ^ 0x80) & 0x80;
        debug!(
            "speed switch to {} speed",
            if self.double_speed() { "double" } else { "normal" }
        );
        self.timer.reset_div(&mut self.interrupts);
        self.stall_m_cycles += SPEED_SWITCH_STALL;
        true
    }

    fn advance_peripherals(&mut self) -> u32 {
        let dots = if self.double_speed() { 2 } else { 4 };
        self.timer.step(CPU_CYCLES_PER_M_CYCLE, &mut self.interrupts);
        self.serial.step(CPU_CYCLES_PER_M_CYCLE, &mut self.interrupts);
        self.step_oam_dma();
        if self.ppu.step(dots, &mut self.interrupts) {
            self.hdma_hblank_transfer();
        }
        dots
    }

    /// Advance every peripheral by one M-cycle, plus any pending DMA stall.
    /// Returns the dots that elapsed.
    pub fn tick(&mut self) -> u32 {
        let mut dots = self.advance_peripherals();
        while self.stall_m_cycles > 0 {
            self.stall_m_cycles -= 1;
            dots += self.advance_peripherals();
        }
        dots
    }
}

impl Bus for Mmu {
    fn read8(&mut self, addr: u16) -> u8 {
        self.read_byte(addr)
    }

    fn write8(&mut self, addr: u16, val: u8) {
        self.write_byte(addr, val);
    }

    fn tick(&mut self) -> u32 {
        Mmu::tick(self)
    }

    fn interrupts(&mut self) -> &mut Interrupts {
        &mut self.interrupts
    }

    fn reset_divider(&mut self) {
        self.timer.reset_div(&mut self.interrupts);
    }

    fn switch_speed(&mut self) -> bool {
        Mmu::switch_speed(self)
    }

    fn joypad_line_low(&self) -> bool {
        self.input.any_selected_pressed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_table_covers_echo() {
        let pages = build_pages();
        assert_eq!(pages[0xE0], Region::WramFixed);
        assert_eq!(pages[0xFD], Region::WramBanked);
        assert_eq!(pages[0xFE], Region::Oam);
        assert_eq!(pages[0xFF], Region::High);
    }

    #[test]
    fn color_ports_only_on_color_hardware() {
        let dmg = build_ports(HardwareMode::Dmg);
        let cgb = build_ports(HardwareMode::Cgb);
        for offset in [0x4D, 0x4F, 0x55, 0x68, 0x6C, 0x70] {
            assert_eq!(dmg[offset], Port::Unmapped, "port FF{offset:02X}");
            assert_ne!(cgb[offset], Port::Unmapped, "port FF{offset:02X}");
        }
    }

    #[test]
    fn oam_dma_start_delay() {
        let mut mmu = Mmu::new(HardwareMode::Dmg);
        mmu.write_byte(0xC000, 0x5A);
        mmu.write_byte(0xFF46, 0xC0);
        mmu.tick();
        mmu.tick();
        assert!(mmu.oam_dma_active());
        assert_eq!(mmu.ppu.oam[0], 0);
        mmu.tick();
        assert_eq!(mmu.ppu.oam[0], 0x5A);
        assert_eq!(mmu.read_byte(0xFE00), 0xFF);
    }
}
