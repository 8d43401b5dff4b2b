mod compat;

pub use compat::CompatibilityPalettes;

use log::debug;
#[cfg(feature = "ppu-trace")]
use log::trace;

use crate::interrupts::{Interrupt, Interrupts};

// Screen resolution used by the LCD
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
pub const FRAME_PIXELS: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

// Timing in dots
pub const DOTS_PER_LINE: u16 = 456;
pub const LINES_PER_FRAME: u8 = 154;
pub const DOTS_PER_FRAME: u32 = DOTS_PER_LINE as u32 * LINES_PER_FRAME as u32;
const OAM_SCAN_DOTS: u16 = 80;
const TRANSFER_BASE_DOTS: u16 = 172;
const WINDOW_PENALTY_DOTS: u16 = 6;
const SPRITE_PENALTY_DOTS: u16 = 6;
const MIN_HBLANK_DOTS: u16 = 16;
const MAX_TRANSFER_DOTS: u16 = DOTS_PER_LINE - OAM_SCAN_DOTS - MIN_HBLANK_DOTS;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
pub const VRAM_BANK_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;
const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_UNUSED_BIT: u8 = 0x40;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

// VRAM layout
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_SIGNED_BASE: usize = 0x1000;

// LCDC bits
const LCDC_BG_ENABLE: u8 = 0x01;
const LCDC_OBJ_ENABLE: u8 = 0x02;
const LCDC_OBJ_TALL: u8 = 0x04;
const LCDC_BG_MAP: u8 = 0x08;
const LCDC_TILE_DATA: u8 = 0x10;
const LCDC_WINDOW_ENABLE: u8 = 0x20;
const LCDC_WINDOW_MAP: u8 = 0x40;
const LCDC_ENABLE: u8 = 0x80;

// STAT interrupt source bits
const STAT_HBLANK: u8 = 0x08;
const STAT_VBLANK: u8 = 0x10;
const STAT_OAM: u8 = 0x20;
const STAT_LYC: u8 = 0x40;

/// Monochrome shades, lightest first, as 0xRRGGBBAA.
pub const DMG_SHADES: [u32; 4] = [0x9BBC0FFF, 0x8BAC0FFF, 0x306230FF, 0x0F380FFF];
const WHITE: u32 = 0xFFFFFFFF;

/// PPU phase reported in the low bits of STAT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

/// Background or window pixel before sprites are mixed in.
#[derive(Copy, Clone)]
struct BgPixel {
    color: u32,
    color_id: u8,
    priority: bool,
}

pub struct Ppu {
    pub vram: [[u8; VRAM_BANK_SIZE]; 2],
    pub vram_bank: usize,
    pub oam: [u8; OAM_SIZE],

    /// Color hardware: color registers are mapped.
    cgb: bool,
    /// Tiles use VRAM attributes and palette RAM directly. Cleared when a
    /// monochrome cartridge runs on color hardware.
    color_render: bool,

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    lyc_eq_ly: bool,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    /// Internal window line counter
    win_line_counter: u8,
    /// WY matched LY at the start of some line this frame.
    window_triggered: bool,
    /// The window starts on the line currently being drawn.
    window_on_line: bool,

    bgpi: u8,
    bgpd: [u8; PAL_RAM_SIZE],
    obpi: u8,
    obpd: [u8; PAL_RAM_SIZE],
    /// Object priority mode register (OPRI)
    opri: u8,

    /// Dots elapsed in the current line.
    dot: u16,
    /// Length of mode 3 on the current line.
    transfer_dots: u16,
    mode: Mode,

    framebuffer: Box<[u32; FRAME_PIXELS]>,
    line_priority: [bool; SCREEN_WIDTH],
    line_color_zero: [bool; SCREEN_WIDTH],
    /// Latched sprites for the current scanline
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    /// Object height (LCDC.2) in force when the line's sprites were picked.
    line_sprite_height: i16,
    stat_irq_line: bool,
    dmg_mode2_vblank_irq_pending: bool,
    frame_counter: u64,
}

impl Ppu {
    /// PPU as found at power-on, before any boot code has run.
    pub fn new(cgb: bool) -> Self {
        let blank = if cgb { WHITE } else { DMG_SHADES[0] };
        let mut ppu = Self {
            vram: [[0; VRAM_BANK_SIZE]; 2],
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            cgb,
            color_render: cgb,
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            lyc_eq_ly: true,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            win_line_counter: 0,
            window_triggered: false,
            window_on_line: false,
            bgpi: PAL_UNUSED_BIT,
            bgpd: [0; PAL_RAM_SIZE],
            obpi: PAL_UNUSED_BIT,
            obpd: [0; PAL_RAM_SIZE],
            opri: 0,
            dot: 0,
            transfer_dots: TRANSFER_BASE_DOTS,
            mode: Mode::HBlank,
            framebuffer: Box::new([blank; FRAME_PIXELS]),
            line_priority: [false; SCREEN_WIDTH],
            line_color_zero: [false; SCREEN_WIDTH],
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            line_sprite_height: 8,
            stat_irq_line: false,
            dmg_mode2_vblank_irq_pending: false,
            frame_counter: 0,
        };
        if cgb {
            // Palette RAM powers up white.
            for pair in ppu.bgpd.chunks_exact_mut(2).chain(ppu.obpd.chunks_exact_mut(2)) {
                pair[0] = 0xFF;
                pair[1] = 0x7F;
            }
        }
        ppu
    }

    /// Initialize registers to the state the boot ROM leaves behind: LCD on,
    /// a new frame starting at line 0. `compat` carries the palettes chosen
    /// for a monochrome cartridge on color hardware.
    pub fn apply_boot_state(&mut self, compat: Option<&CompatibilityPalettes>) {
        self.lcdc = 0x91;
        self.stat = 0;
        self.bgp = 0xFC;
        self.obp0 = 0xFF;
        self.obp1 = 0xFF;
        if let Some(palettes) = compat
            && self.cgb
        {
            self.apply_dmg_compatibility_palettes(palettes);
        }
        self.start_frame();
        self.stat_irq_line = false;
        self.dmg_mode2_vblank_irq_pending = false;
    }

    /// Load the palettes the color boot ROM picks for a monochrome
    /// cartridge and switch to the monochrome pixel path.
    pub fn apply_dmg_compatibility_palettes(&mut self, palettes: &CompatibilityPalettes) {
        let (obj0, rest) = self.obpd.split_at_mut(8);
        let (obj1, _) = rest.split_at_mut(8);
        Self::write_palette(obj0, palettes.obj0);
        Self::write_palette(obj1, palettes.obj1);

        let (bg0, _) = self.bgpd.split_at_mut(8);
        Self::write_palette(bg0, palettes.bg0);

        self.enter_compatibility_mode();
        self.opri = 0x01;
    }

    /// Render through BGP/OBP0/OBP1 and palette RAM entries 0-1 only,
    /// ignoring VRAM attributes.
    pub fn enter_compatibility_mode(&mut self) {
        self.color_render = false;
    }

    fn write_palette(slice: &mut [u8], pal: [u16; 4]) {
        for (i, &c) in pal.iter().enumerate() {
            slice[i * 2] = (c & 0xFF) as u8;
            slice[i * 2 + 1] = (c >> 8) as u8;
        }
    }

    fn decode_cgb_color(lo: u8, hi: u8) -> u32 {
        let raw = ((hi as u16) << 8) | lo as u16;
        let expand = |c: u16| -> u32 {
            let c = (c & 0x1F) as u32;
            (c << 3) | (c >> 2)
        };
        (expand(raw) << 24) | (expand(raw >> 5) << 16) | (expand(raw >> 10) << 8) | 0xFF
    }

    pub fn framebuffer(&self) -> &[u32; FRAME_PIXELS] {
        &self.framebuffer
    }

    /// Number of VBlank entries since power on.
    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & LCDC_ENABLE != 0
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    /// Dots elapsed in the current line.
    pub fn dot(&self) -> u16 {
        self.dot
    }

    /// Length of mode 3 on the current line.
    pub fn transfer_dots(&self) -> u16 {
        self.transfer_dots
    }

    pub fn window_line_counter(&self) -> u8 {
        self.win_line_counter
    }

    pub fn vram_accessible(&self) -> bool {
        !self.lcd_enabled() || self.mode != Mode::Transfer
    }

    pub fn oam_accessible(&self) -> bool {
        !self.lcd_enabled() || matches!(self.mode, Mode::HBlank | Mode::VBlank)
    }

    /// Get a background palette color as 0xRRGGBBAA.
    pub fn bg_palette_color(&self, palette: usize, color_id: usize) -> u32 {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.bgpd[off], self.bgpd[off + 1])
    }

    /// Get an object palette color as 0xRRGGBBAA.
    pub fn obj_palette_color(&self, palette: usize, color_id: usize) -> u32 {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.obpd[off], self.obpd[off + 1])
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        if !self.vram_accessible() {
            return 0xFF;
        }
        self.vram[self.vram_bank][addr as usize & (VRAM_BANK_SIZE - 1)]
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        if self.vram_accessible() {
            self.vram[self.vram_bank][addr as usize & (VRAM_BANK_SIZE - 1)] = val;
        }
    }

    pub fn read_oam(&self, addr: u16) -> u8 {
        if !self.oam_accessible() {
            return 0xFF;
        }
        self.oam[(addr - 0xFE00) as usize]
    }

    pub fn write_oam(&mut self, addr: u16, val: u8) {
        if self.oam_accessible() {
            self.oam[(addr - 0xFE00) as usize] = val;
        }
    }

    pub fn read_vram_bank(&self) -> u8 {
        0xFE | self.vram_bank as u8
    }

    pub fn write_vram_bank(&mut self, val: u8) {
        self.vram_bank = (val & 0x01) as usize;
    }

    fn sanitize_palette_index(value: u8) -> u8 {
        (value & (PAL_AUTO_INCREMENT_BIT | PAL_INDEX_MASK)) | PAL_UNUSED_BIT
    }

    fn palette_ram_index(index: u8) -> usize {
        (index & PAL_INDEX_MASK) as usize
    }

    fn step_palette_index(index: &mut u8) {
        let current = *index;
        if current & PAL_AUTO_INCREMENT_BIT == 0 {
            return;
        }
        let next_idx = current.wrapping_add(1) & PAL_INDEX_MASK;
        *index = PAL_AUTO_INCREMENT_BIT | PAL_UNUSED_BIT | next_idx;
    }

    fn update_lyc_compare(&mut self) {
        if self.lcd_enabled() {
            self.lyc_eq_ly = self.ly == self.lyc;
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                (self.stat & 0x78)
                    | 0x80
                    | self.mode as u8
                    | if self.lyc_eq_ly { 0x04 } else { 0 }
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF68 if self.cgb => self.bgpi,
            0xFF69 if self.cgb => self.bgpd[Self::palette_ram_index(self.bgpi)],
            0xFF6A if self.cgb => self.obpi,
            0xFF6B if self.cgb => self.obpd[Self::palette_ram_index(self.obpi)],
            0xFF6C if self.cgb => self.opri | 0xFE,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                match (was_on, self.lcd_enabled()) {
                    (true, false) => self.switch_off(),
                    (false, true) => {
                        debug!("LCD on");
                        self.start_frame();
                    }
                    _ => {}
                }
            }
            0xFF41 => self.stat = (self.stat & 0x07) | (val & 0x78),
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF44 => {}
            0xFF45 => {
                self.lyc = val;
                self.update_lyc_compare();
            }
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF68 if self.cgb => self.bgpi = Self::sanitize_palette_index(val),
            0xFF69 if self.cgb => {
                let idx = Self::palette_ram_index(self.bgpi);
                self.bgpd[idx] = val;
                Self::step_palette_index(&mut self.bgpi);
            }
            0xFF6A if self.cgb => self.obpi = Self::sanitize_palette_index(val),
            0xFF6B if self.cgb => {
                let idx = Self::palette_ram_index(self.obpi);
                self.obpd[idx] = val;
                Self::step_palette_index(&mut self.obpi);
            }
            0xFF6C if self.cgb => self.opri = val & 0x01,
            _ => {}
        }
    }

    fn switch_off(&mut self) {
        debug!("LCD off");
        self.mode = Mode::HBlank;
        self.dot = 0;
        self.ly = 0;
        self.win_line_counter = 0;
        self.stat_irq_line = false;
        self.dmg_mode2_vblank_irq_pending = false;
        let blank = if self.cgb { WHITE } else { DMG_SHADES[0] };
        self.framebuffer.fill(blank);
    }

    fn start_frame(&mut self) {
        self.ly = 0;
        self.dot = 0;
        self.win_line_counter = 0;
        self.window_triggered = false;
        self.update_lyc_compare();
        self.begin_oam_scan();
    }

    fn set_mode(&mut self, mode: Mode) {
        #[cfg(feature = "ppu-trace")]
        trace!("LY={:3} dot={:3} {:?} -> {:?}", self.ly, self.dot, self.mode, mode);
        self.mode = mode;
    }

    fn begin_oam_scan(&mut self) {
        if self.ly == self.wy {
            self.window_triggered = true;
        }
        self.set_mode(Mode::OamScan);
    }

    /// Collect up to 10 sprites visible on the current scanline.
    fn oam_scan(&mut self) {
        let sprite_height: i16 = if self.lcdc & LCDC_OBJ_TALL != 0 { 16 } else { 8 };
        self.line_sprite_height = sprite_height;
        self.sprite_count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.sprite_count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if self.ly as i16 >= y && (self.ly as i16) < y + sprite_height {
                self.line_sprites[self.sprite_count] = Sprite {
                    x: self.oam[base + 1] as i16 - 8,
                    y,
                    tile: self.oam[base + 2],
                    flags: self.oam[base + 3],
                    oam_index: i,
                };
                self.sprite_count += 1;
            }
        }
        if self.color_render && self.opri & 0x01 == 0 {
            self.line_sprites[..self.sprite_count].sort_by_key(|s| s.oam_index);
        } else {
            self.line_sprites[..self.sprite_count].sort_by_key(|s| (s.x, s.oam_index));
        }
    }

    fn begin_transfer(&mut self) {
        self.oam_scan();
        self.window_on_line = self.lcdc & LCDC_WINDOW_ENABLE != 0
            && self.window_triggered
            && self.wx <= WINDOW_X_MAX;
        let mut dots = TRANSFER_BASE_DOTS + (self.scx % 8) as u16;
        if self.window_on_line {
            dots += WINDOW_PENALTY_DOTS;
        }
        dots += SPRITE_PENALTY_DOTS * self.sprite_count as u16;
        self.transfer_dots = dots.min(MAX_TRANSFER_DOTS);
        self.set_mode(Mode::Transfer);
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    /// Color of a monochrome shade. Color hardware in compatibility mode
    /// looks the shade up in palette RAM.
    fn shade_color(&self, shade: u8, obj_palette: Option<usize>) -> u32 {
        if !self.cgb {
            return DMG_SHADES[shade as usize];
        }
        match obj_palette {
            Some(palette) => self.obj_palette_color(palette, shade as usize),
            None => self.bg_palette_color(0, shade as usize),
        }
    }

    fn tile_row_addr(&self, tile_index: u8, tile_y: usize) -> usize {
        let base = if self.lcdc & LCDC_TILE_DATA != 0 {
            tile_index as usize * 16
        } else {
            (TILE_DATA_SIGNED_BASE as isize + (tile_index as i8 as isize) * 16) as usize
        };
        base + tile_y * 2
    }

    fn fetch_bg_pixel(&self, map_base: usize, px: usize, py: usize) -> BgPixel {
        let map_idx = map_base + (py / 8) * 32 + px / 8;
        let tile_index = self.vram[0][map_idx];
        let attr = if self.color_render {
            self.vram[1][map_idx]
        } else {
            0
        };
        let mut tile_y = py % 8;
        if attr & 0x40 != 0 {
            tile_y = 7 - tile_y;
        }
        let bit = if attr & 0x20 != 0 { px % 8 } else { 7 - px % 8 };
        let bank = ((attr >> 3) & 0x01) as usize;
        let addr = self.tile_row_addr(tile_index, tile_y);
        let lo = self.vram[bank][addr];
        let hi = self.vram[bank][addr + 1];
        let color_id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
        let color = if self.color_render {
            self.bg_palette_color((attr & 0x07) as usize, color_id as usize)
        } else {
            self.shade_color(Self::dmg_shade(self.bgp, color_id), None)
        };
        BgPixel {
            color,
            color_id,
            priority: attr & 0x80 != 0,
        }
    }

    fn render_scanline(&mut self) {
        let ly = self.ly as usize;
        if ly >= SCREEN_HEIGHT {
            return;
        }
        let row = ly * SCREEN_WIDTH;

        // On monochrome output LCDC.0 blanks background and window. On color
        // output it only strips their priority over sprites.
        let bg_enabled = self.color_render || self.lcdc & LCDC_BG_ENABLE != 0;
        let master_priority = !self.color_render || self.lcdc & LCDC_BG_ENABLE != 0;

        let bg_map = if self.lcdc & LCDC_BG_MAP != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let window_map = if self.lcdc & LCDC_WINDOW_MAP != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let window_x = self.wx as i16 - 7;
        let window_visible =
            bg_enabled && self.window_on_line && window_x < SCREEN_WIDTH as i16;
        let window_y = self.win_line_counter as usize;
        let bg_y = (ly + self.scy as usize) & 0xFF;

        for x in 0..SCREEN_WIDTH {
            let pixel = if !bg_enabled {
                BgPixel {
                    color: self.shade_color(0, None),
                    color_id: 0,
                    priority: false,
                }
            } else if window_visible && x as i16 >= window_x {
                self.fetch_bg_pixel(window_map, (x as i16 - window_x) as usize, window_y)
            } else {
                self.fetch_bg_pixel(bg_map, (x + self.scx as usize) & 0xFF, bg_y)
            };
            self.framebuffer[row + x] = pixel.color;
            self.line_priority[x] = pixel.priority;
            self.line_color_zero[x] = pixel.color_id == 0;
        }
        if window_visible {
            self.win_line_counter = self.win_line_counter.wrapping_add(1);
        }

        if self.lcdc & LCDC_OBJ_ENABLE != 0 {
            self.render_sprites(row, master_priority);
        }
    }

    fn render_sprites(&mut self, row: usize, master_priority: bool) {
        // Rows were selected at OAM scan; a later LCDC.2 change must not
        // move them outside the sprite.
        let sprite_height = self.line_sprite_height;
        let mut drawn = [false; SCREEN_WIDTH];
        for i in 0..self.sprite_count {
            let s = self.line_sprites[i];
            let tile = if sprite_height == 16 {
                s.tile & 0xFE
            } else {
                s.tile
            };
            let mut line_idx = self.ly as i16 - s.y;
            if s.flags & 0x40 != 0 {
                line_idx = sprite_height - 1 - line_idx;
            }
            let bank = if self.color_render {
                ((s.flags >> 3) & 0x01) as usize
            } else {
                0
            };
            let addr = tile as usize * 16 + line_idx as usize * 2;
            let lo = self.vram[bank][addr];
            let hi = self.vram[bank][addr + 1];
            for px in 0..8u8 {
                let bit = if s.flags & 0x20 != 0 { px } else { 7 - px };
                let color_id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
                if color_id == 0 {
                    continue;
                }
                let sx = s.x + px as i16;
                if !(0..SCREEN_WIDTH as i16).contains(&sx) || drawn[sx as usize] {
                    continue;
                }
                let sx = sx as usize;
                // The first opaque sprite pixel owns the position even when
                // the background ends up covering it.
                drawn[sx] = true;
                let bg_zero = self.line_color_zero[sx];
                if master_priority && !bg_zero {
                    if self.color_render && self.line_priority[sx] {
                        continue;
                    }
                    if s.flags & 0x80 != 0 {
                        continue;
                    }
                }
                let color = if self.color_render {
                    self.obj_palette_color((s.flags & 0x07) as usize, color_id as usize)
                } else {
                    let (palette_reg, palette) = if s.flags & 0x10 != 0 {
                        (self.obp1, 1)
                    } else {
                        (self.obp0, 0)
                    };
                    self.shade_color(Self::dmg_shade(palette_reg, color_id), Some(palette))
                };
                self.framebuffer[row + sx] = color;
            }
        }
    }

    /// Advance by `dots` PPU clocks. Returns true when an HBlank period on a
    /// visible line began during this step.
    pub fn step(&mut self, dots: u32, interrupts: &mut Interrupts) -> bool {
        if !self.lcd_enabled() {
            return false;
        }
        let mut hblank_started = false;
        for _ in 0..dots {
            self.dot += 1;
            match self.mode {
                Mode::OamScan if self.dot == OAM_SCAN_DOTS => self.begin_transfer(),
                Mode::Transfer if self.dot == OAM_SCAN_DOTS + self.transfer_dots => {
                    self.render_scanline();
                    self.set_mode(Mode::HBlank);
                    hblank_started = true;
                }
                _ => {}
            }
            if self.dot == DOTS_PER_LINE {
                self.dot = 0;
                self.next_line(interrupts);
            }
            self.update_stat_irq(interrupts);
        }
        hblank_started
    }

    fn next_line(&mut self, interrupts: &mut Interrupts) {
        self.ly += 1;
        if self.ly == SCREEN_HEIGHT as u8 {
            self.set_mode(Mode::VBlank);
            interrupts.raise(Interrupt::VBlank);
            self.frame_counter = self.frame_counter.wrapping_add(1);
            if !self.cgb {
                self.dmg_mode2_vblank_irq_pending = true;
            }
        } else if self.ly == LINES_PER_FRAME {
            self.start_frame();
            return;
        } else if self.ly < SCREEN_HEIGHT as u8 {
            self.begin_oam_scan();
        }
        self.update_lyc_compare();
    }

    fn update_stat_irq(&mut self, interrupts: &mut Interrupts) {
        let coincidence = self.lyc_eq_ly && self.stat & STAT_LYC != 0;
        let mode_signal = match self.mode {
            Mode::HBlank => self.stat & STAT_HBLANK != 0,
            Mode::VBlank => self.stat & STAT_VBLANK != 0,
            Mode::OamScan => self.stat & STAT_OAM != 0,
            Mode::Transfer => false,
        };
        // Monochrome hardware also fires the mode 2 source on entry to line 144.
        let glitch = self.dmg_mode2_vblank_irq_pending && self.stat & STAT_OAM != 0;
        self.dmg_mode2_vblank_irq_pending = false;
        let current = coincidence || mode_signal;
        if (current && !self.stat_irq_line) || glitch {
            interrupts.raise(Interrupt::Stat);
        }
        self.stat_irq_line = current || glitch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted(cgb: bool) -> (Ppu, Interrupts) {
        let mut ppu = Ppu::new(cgb);
        ppu.apply_boot_state(None);
        (ppu, Interrupts::new())
    }

    #[test]
    fn line_phases_without_sprites() {
        let (mut ppu, mut irq) = booted(false);
        assert_eq!(ppu.mode(), Mode::OamScan);
        ppu.step(79, &mut irq);
        assert_eq!(ppu.mode(), Mode::OamScan);
        ppu.step(1, &mut irq);
        assert_eq!(ppu.mode(), Mode::Transfer);
        assert_eq!(ppu.transfer_dots(), 172);
        assert!(!ppu.step(171, &mut irq));
        assert!(ppu.step(1, &mut irq));
        assert_eq!(ppu.mode(), Mode::HBlank);
        ppu.step(456 - 252, &mut irq);
        assert_eq!(ppu.ly(), 1);
        assert_eq!(ppu.mode(), Mode::OamScan);
    }

    #[test]
    fn transfer_grows_with_scroll_and_sprites() {
        let (mut ppu, mut irq) = booted(false);
        ppu.write_reg(0xFF43, 0x05);
        for i in 0..3 {
            ppu.oam[i * 4] = 16;
            ppu.oam[i * 4 + 1] = 8 + i as u8 * 8;
        }
        ppu.step(80, &mut irq);
        assert_eq!(ppu.transfer_dots(), 172 + 5 + 18);
    }

    #[test]
    fn vblank_once_per_frame() {
        let (mut ppu, mut irq) = booted(false);
        ppu.step(144 * 456 - 1, &mut irq);
        assert!(!irq.is_requested(Interrupt::VBlank));
        ppu.step(1, &mut irq);
        assert!(irq.is_requested(Interrupt::VBlank));
        assert_eq!(ppu.mode(), Mode::VBlank);
        assert_eq!(ppu.frames(), 1);
        irq.clear(Interrupt::VBlank);
        ppu.step(10 * 456, &mut irq);
        assert_eq!(ppu.ly(), 0);
        assert!(!irq.is_requested(Interrupt::VBlank));
        ppu.step(DOTS_PER_FRAME - 10 * 456, &mut irq);
        assert_eq!(ppu.frames(), 2);
    }

    #[test]
    fn lyc_source_fires_on_rising_edge() {
        let (mut ppu, mut irq) = booted(false);
        ppu.write_reg(0xFF45, 2);
        ppu.write_reg(0xFF41, STAT_LYC);
        ppu.step(2 * 456 - 1, &mut irq);
        assert!(!irq.is_requested(Interrupt::Stat));
        ppu.step(1, &mut irq);
        assert!(irq.is_requested(Interrupt::Stat));
        assert_eq!(ppu.read_reg(0xFF41) & 0x04, 0x04);
        irq.clear(Interrupt::Stat);
        ppu.step(100, &mut irq);
        assert!(!irq.is_requested(Interrupt::Stat));
    }

    #[test]
    fn lcd_off_resets_and_blanks() {
        let (mut ppu, mut irq) = booted(false);
        ppu.step(3 * 456 + 100, &mut irq);
        ppu.framebuffer[0] = DMG_SHADES[3];
        ppu.write_reg(0xFF40, 0x11);
        assert_eq!(ppu.ly(), 0);
        assert_eq!(ppu.mode(), Mode::HBlank);
        assert_eq!(ppu.read_reg(0xFF41) & 0x03, 0);
        assert!(ppu.framebuffer().iter().all(|&p| p == DMG_SHADES[0]));
        ppu.step(DOTS_PER_FRAME, &mut irq);
        assert_eq!(ppu.frames(), 0);
        ppu.write_reg(0xFF40, 0x91);
        assert_eq!(ppu.mode(), Mode::OamScan);
    }

    #[test]
    fn renders_background_tile() {
        let (mut ppu, mut irq) = booted(false);
        ppu.write_reg(0xFF47, 0xE4);
        // Tile 1, every row color 3.
        for row in 0..8 {
            ppu.vram[0][16 + row * 2] = 0xFF;
            ppu.vram[0][16 + row * 2 + 1] = 0xFF;
        }
        ppu.vram[0][BG_MAP_0_BASE] = 1;
        ppu.step(456, &mut irq);
        let fb = ppu.framebuffer();
        assert!(fb[..8].iter().all(|&p| p == DMG_SHADES[3]));
        assert_eq!(fb[8], DMG_SHADES[0]);
    }

    #[test]
    fn sprite_behind_background_hides() {
        let (mut ppu, mut irq) = booted(false);
        ppu.write_reg(0xFF40, 0x93);
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF48, 0xE4);
        for row in 0..8 {
            // Tile 1: color 1 everywhere. Tile 2: color 3 everywhere.
            ppu.vram[0][16 + row * 2] = 0xFF;
            ppu.vram[0][32 + row * 2] = 0xFF;
            ppu.vram[0][32 + row * 2 + 1] = 0xFF;
        }
        ppu.vram[0][BG_MAP_0_BASE] = 1;
        ppu.oam[0..4].copy_from_slice(&[16, 8, 2, 0x80]);
        ppu.oam[4..8].copy_from_slice(&[16, 16, 2, 0x00]);
        ppu.step(456, &mut irq);
        let fb = ppu.framebuffer();
        assert_eq!(fb[0], DMG_SHADES[1]);
        assert_eq!(fb[8], DMG_SHADES[3]);
    }

    #[test]
    fn object_height_change_during_transfer_keeps_scanned_rows() {
        let (mut ppu, mut irq) = booted(false);
        ppu.write_reg(0xFF40, 0x97);
        ppu.write_reg(0xFF48, 0xE4);
        // Row 5 of tile 0 is color 3.
        ppu.vram[0][10] = 0xFF;
        ppu.vram[0][11] = 0xFF;
        // Tall sprite covering lines -10..6, flipped vertically: line 0 is
        // row 10 of the pair, drawn from row 5.
        ppu.oam[0..4].copy_from_slice(&[6, 8, 0, 0x40]);
        ppu.step(80, &mut irq);
        assert_eq!(ppu.mode(), Mode::Transfer);
        ppu.write_reg(0xFF40, 0x93);
        ppu.step(200, &mut irq);
        assert_eq!(ppu.mode(), Mode::HBlank);
        assert_eq!(ppu.framebuffer()[0], DMG_SHADES[3]);
        assert_eq!(ppu.framebuffer()[8], DMG_SHADES[0]);
    }

    #[test]
    fn window_line_counter_pauses_while_hidden() {
        let (mut ppu, mut irq) = booted(false);
        const WINDOW_ON: u8 = 0xF1;
        const WINDOW_OFF: u8 = 0xD1;
        ppu.write_reg(0xFF40, WINDOW_ON);
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF4A, 2);
        ppu.write_reg(0xFF4B, 7);
        // Window map entry 0 is tile 1, whose row 2 alone is color 3.
        ppu.vram[0][BG_MAP_1_BASE] = 1;
        ppu.vram[0][16 + 4] = 0xFF;
        ppu.vram[0][16 + 5] = 0xFF;
        // The boot frame matched WY=0 at line 0; start a fresh one.
        ppu.step(DOTS_PER_FRAME, &mut irq);
        assert_eq!(ppu.window_line_counter(), 0);

        // Not triggered until LY matches WY.
        ppu.step(2 * 456, &mut irq);
        assert_eq!(ppu.window_line_counter(), 0);
        ppu.step(2 * 456, &mut irq);
        assert_eq!(ppu.window_line_counter(), 2);

        ppu.write_reg(0xFF40, WINDOW_OFF);
        ppu.step(2 * 456, &mut irq);
        assert_eq!(ppu.window_line_counter(), 2);
        assert_eq!(ppu.framebuffer()[4 * SCREEN_WIDTH], DMG_SHADES[0]);

        // Line 6 draws window row 2, not row LY - WY.
        ppu.write_reg(0xFF40, WINDOW_ON);
        ppu.step(456, &mut irq);
        assert_eq!(ppu.window_line_counter(), 3);
        assert_eq!(ppu.framebuffer()[6 * SCREEN_WIDTH], DMG_SHADES[3]);

        // WX past the right edge keeps the window off the line.
        ppu.write_reg(0xFF4B, WINDOW_X_MAX + 1);
        ppu.step(456, &mut irq);
        assert_eq!(ppu.window_line_counter(), 3);

        // A new frame restarts the counter.
        ppu.write_reg(0xFF4B, 7);
        ppu.step(DOTS_PER_FRAME - 8 * 456, &mut irq);
        assert_eq!(ppu.ly(), 0);
        assert_eq!(ppu.window_line_counter(), 0);
    }

    const RED: u16 = 0x001F;
    const GREEN: u16 = 0x03E0;
    const BLUE: u16 = 0x7C00;

    fn set_color(pal: &mut [u8; PAL_RAM_SIZE], palette: usize, color_id: usize, color: u16) {
        let off = palette * 8 + color_id * 2;
        pal[off] = color as u8;
        pal[off + 1] = (color >> 8) as u8;
    }

    /// Color scene: BG tile 1 (color 1, red) with the priority attribute at
    /// x 0-7, a green color 3 sprite on top of it and another over the
    /// plain background at x 8. Returns pixels 0, 8 and 16 of line 0.
    fn color_priority_scene(lcdc: u8) -> [u32; 3] {
        let (mut ppu, mut irq) = booted(true);
        ppu.write_reg(0xFF40, lcdc);
        set_color(&mut ppu.bgpd, 0, 1, RED);
        set_color(&mut ppu.obpd, 0, 3, GREEN);
        for row in 0..8 {
            ppu.vram[0][16 + row * 2] = 0xFF;
            ppu.vram[0][32 + row * 2] = 0xFF;
            ppu.vram[0][32 + row * 2 + 1] = 0xFF;
        }
        ppu.vram[0][BG_MAP_0_BASE] = 1;
        ppu.vram[1][BG_MAP_0_BASE] = 0x80;
        ppu.oam[0..4].copy_from_slice(&[16, 8, 2, 0x00]);
        ppu.oam[4..8].copy_from_slice(&[16, 16, 2, 0x00]);
        ppu.step(456, &mut irq);
        let fb = ppu.framebuffer();
        [fb[0], fb[8], fb[16]]
    }

    #[test]
    fn color_bg_attribute_priority_covers_sprites() {
        let [prioritized, plain, empty] = color_priority_scene(0x93);
        assert_eq!(prioritized, 0xFF0000FF);
        assert_eq!(plain, 0x00FF00FF);
        assert_eq!(empty, WHITE);
    }

    #[test]
    fn color_lcdc0_clear_drops_bg_priority_but_keeps_bg() {
        let [prioritized, plain, empty] = color_priority_scene(0x92);
        assert_eq!(prioritized, 0x00FF00FF);
        assert_eq!(plain, 0x00FF00FF);
        assert_eq!(empty, WHITE);
    }

    /// Two overlapping sprites: OAM 0 (green) at x 4, OAM 1 (blue) at x 0.
    /// Returns the pixel at x 4 where they overlap.
    fn overlap_pixel(opri: u8) -> u32 {
        let (mut ppu, mut irq) = booted(true);
        ppu.write_reg(0xFF40, 0x93);
        ppu.write_reg(0xFF6C, opri);
        set_color(&mut ppu.obpd, 0, 3, GREEN);
        set_color(&mut ppu.obpd, 1, 3, BLUE);
        for row in 0..8 {
            ppu.vram[0][32 + row * 2] = 0xFF;
            ppu.vram[0][32 + row * 2 + 1] = 0xFF;
        }
        ppu.oam[0..4].copy_from_slice(&[16, 12, 2, 0x00]);
        ppu.oam[4..8].copy_from_slice(&[16, 8, 2, 0x01]);
        ppu.step(456, &mut irq);
        assert_eq!(ppu.read_reg(0xFF6C), 0xFE | opri);
        ppu.framebuffer()[4]
    }

    #[test]
    fn opri_selects_sprite_order() {
        assert_eq!(overlap_pixel(0), 0x00FF00FF);
        assert_eq!(overlap_pixel(1), 0x0000FFFF);
    }

    #[test]
    fn compatibility_palettes_load_into_palette_ram() {
        let mut ppu = Ppu::new(true);
        let palettes = CompatibilityPalettes {
            bg0: [0x7FFF, RED, GREEN, BLUE],
            obj0: [0x7FFF, BLUE, GREEN, RED],
            obj1: [0x0000, RED, RED, RED],
        };
        ppu.apply_boot_state(Some(&palettes));
        assert_eq!(ppu.bg_palette_color(0, 1), 0xFF0000FF);
        assert_eq!(ppu.obj_palette_color(0, 1), 0x0000FFFF);
        assert_eq!(ppu.obj_palette_color(1, 0), 0x000000FF);
        assert_eq!(ppu.read_reg(0xFF6C), 0xFF);

        // Monochrome shades now go through palette RAM.
        let mut irq = Interrupts::new();
        ppu.write_reg(0xFF47, 0xE4);
        ppu.vram[0][0] = 0xFF;
        ppu.step(456, &mut irq);
        assert_eq!(ppu.framebuffer()[0], 0xFF0000FF);
    }

    #[test]
    fn palette_data_auto_increments() {
        let (mut ppu, _) = booted(true);
        ppu.write_reg(0xFF68, 0x80);
        ppu.write_reg(0xFF69, 0x1F);
        ppu.write_reg(0xFF69, 0x00);
        assert_eq!(ppu.read_reg(0xFF68), 0xC2);
        assert_eq!(ppu.bg_palette_color(0, 0), 0xFF0000FF);
        ppu.write_reg(0xFF68, 0x01);
        assert_eq!(ppu.read_reg(0xFF69), 0x00);
        assert_eq!(ppu.read_reg(0xFF68), 0x41);
    }

    #[test]
    fn color_registers_unmapped_on_monochrome() {
        let (mut ppu, _) = booted(false);
        ppu.write_reg(0xFF68, 0x80);
        assert_eq!(ppu.read_reg(0xFF68), 0xFF);
        assert_eq!(ppu.read_reg(0xFF6C), 0xFF);
    }
}
