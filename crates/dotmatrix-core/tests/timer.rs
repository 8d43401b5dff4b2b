use dotmatrix_core::{hardware::HardwareMode, interrupts::Interrupt, mmu::Mmu};

fn ticks(mmu: &mut Mmu, n: usize) {
    for _ in 0..n {
        mmu.tick();
    }
}

#[test]
fn div_reset_then_tac_change_does_not_double_count() {
    let mut mmu = Mmu::new(HardwareMode::Dmg);
    mmu.write_byte(0xFF07, 0x05);
    // Eight cycles: divider bit 3 is now high.
    ticks(&mut mmu, 2);
    assert_eq!(mmu.read_byte(0xFF05), 0);

    // Resetting DIV drops the selected bit: one increment.
    mmu.write_byte(0xFF04, 0x00);
    assert_eq!(mmu.read_byte(0xFF05), 1);

    // Switching to bit 5 while the divider is zero is not an edge.
    mmu.write_byte(0xFF07, 0x06);
    assert_eq!(mmu.read_byte(0xFF05), 1);
}

#[test]
fn overflow_reads_zero_for_one_m_cycle_then_reloads() {
    let mut mmu = Mmu::new(HardwareMode::Dmg);
    mmu.write_byte(0xFF06, 0xAB);
    mmu.write_byte(0xFF05, 0xFF);
    mmu.write_byte(0xFF07, 0x05);

    ticks(&mut mmu, 4);
    assert_eq!(mmu.read_byte(0xFF05), 0x00);
    assert!(!mmu.interrupts.is_requested(Interrupt::Timer));

    ticks(&mut mmu, 1);
    assert_eq!(mmu.read_byte(0xFF05), 0xAB);
    assert!(mmu.interrupts.is_requested(Interrupt::Timer));
}

#[test]
fn tima_write_during_delay_cancels_reload() {
    let mut mmu = Mmu::new(HardwareMode::Dmg);
    mmu.write_byte(0xFF06, 0xAB);
    mmu.write_byte(0xFF05, 0xFF);
    mmu.write_byte(0xFF07, 0x05);

    ticks(&mut mmu, 4);
    mmu.write_byte(0xFF05, 0x10);
    ticks(&mut mmu, 1);
    assert_eq!(mmu.read_byte(0xFF05), 0x10);
    assert!(!mmu.interrupts.is_requested(Interrupt::Timer));
}

#[test]
fn divider_advances_with_bus_ticks() {
    let mut mmu = Mmu::new(HardwareMode::Dmg);
    ticks(&mut mmu, 64);
    assert_eq!(mmu.read_byte(0xFF04), 1);
    mmu.write_byte(0xFF04, 0x77);
    assert_eq!(mmu.read_byte(0xFF04), 0);
}
