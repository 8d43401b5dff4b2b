use crate::interrupts::{Interrupt, Interrupts};

/// The eight buttons of the handheld.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    fn is_direction(self) -> bool {
        matches!(
            self,
            Button::Right | Button::Left | Button::Up | Button::Down
        )
    }

    /// Line of the P1 low nibble this button pulls down.
    fn line(self) -> u8 {
        match self {
            Button::A | Button::Right => 0x01,
            Button::B | Button::Left => 0x02,
            Button::Select | Button::Up => 0x04,
            Button::Start | Button::Down => 0x08,
        }
    }
}

const SELECT_DIRECTIONS: u8 = 0x10;
const SELECT_ACTIONS: u8 = 0x20;
const SELECT_MASK: u8 = SELECT_DIRECTIONS | SELECT_ACTIONS;

/// P1 (FF00) button latch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    /// Bits 4-5 as last written; 0 selects the group.
    select: u8,
    /// Pressed direction buttons, 1 = pressed.
    directions: u8,
    /// Pressed action buttons, 1 = pressed.
    actions: u8,
    /// Low nibble as last observed, used for edge detection.
    lines: u8,
}

impl Input {
    pub fn new() -> Self {
        Self {
            select: SELECT_MASK,
            directions: 0,
            actions: 0,
            lines: 0x0F,
        }
    }

    /// Latch state left behind by the boot ROM: both groups selected.
    pub fn post_boot() -> Self {
        Self {
            select: 0,
            ..Self::new()
        }
    }

    pub fn read(&self) -> u8 {
        0xC0 | self.select | self.visible_lines()
    }

    pub fn write(&mut self, value: u8, interrupts: &mut Interrupts) {
        self.select = value & SELECT_MASK;
        self.update_lines(interrupts);
    }

    pub fn set_button(&mut self, button: Button, pressed: bool, interrupts: &mut Interrupts) {
        let group = if button.is_direction() {
            &mut self.directions
        } else {
            &mut self.actions
        };
        if pressed {
            *group |= button.line();
        } else {
            *group &= !button.line();
        }
        self.update_lines(interrupts);
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        let group = if button.is_direction() {
            self.directions
        } else {
            self.actions
        };
        group & button.line() != 0
    }

    /// True while a selected line is held low. Wakes the CPU from STOP.
    pub fn any_selected_pressed(&self) -> bool {
        self.visible_lines() != 0x0F
    }

    fn visible_lines(&self) -> u8 {
        let mut pressed = 0;
        if self.select & SELECT_DIRECTIONS == 0 {
            pressed |= self.directions;
        }
        if self.select & SELECT_ACTIONS == 0 {
            pressed |= self.actions;
        }
        !pressed & 0x0F
    }

    fn update_lines(&mut self, interrupts: &mut Interrupts) {
        let now = self.visible_lines();
        // Any line going from high to low requests the interrupt.
        if self.lines & !now != 0 {
            interrupts.raise(Interrupt::Joypad);
        }
        self.lines = now;
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressed_buttons_read_low() {
        let mut irq = Interrupts::new();
        let mut input = Input::new();
        input.write(0x20, &mut irq);
        input.set_button(Button::Down, true, &mut irq);
        assert_eq!(input.read(), 0xE7);
        input.write(0x10, &mut irq);
        assert_eq!(input.read(), 0xDF);
    }

    #[test]
    fn both_groups_selected_and_lines() {
        let mut irq = Interrupts::new();
        let mut input = Input::post_boot();
        assert_eq!(input.read(), 0xCF);
        input.set_button(Button::A, true, &mut irq);
        input.set_button(Button::Left, true, &mut irq);
        assert_eq!(input.read(), 0xCC);
    }

    #[test]
    fn unselected_press_raises_nothing() {
        let mut irq = Interrupts::new();
        let mut input = Input::new();
        input.write(0x10, &mut irq);
        input.set_button(Button::Up, true, &mut irq);
        assert!(!irq.is_requested(Interrupt::Joypad));
        assert_eq!(input.read() & 0x0F, 0x0F);
        // Selecting the group with the button held is a falling edge too.
        input.write(0x20, &mut irq);
        assert!(irq.is_requested(Interrupt::Joypad));
    }

    #[test]
    fn release_does_not_raise() {
        let mut irq = Interrupts::new();
        let mut input = Input::post_boot();
        input.set_button(Button::Start, true, &mut irq);
        assert!(irq.is_requested(Interrupt::Joypad));
        irq.clear(Interrupt::Joypad);
        input.set_button(Button::Start, false, &mut irq);
        assert!(!irq.is_requested(Interrupt::Joypad));
        assert!(!input.is_pressed(Button::Start));
    }
}
