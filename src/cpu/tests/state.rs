//! Reset, cycle budgeting, snapshot round-trips, cycle stamping, and the
//! refresh counter.

use super::*;

// ========== Reset ==========

#[test]
fn power_on_state() {
    let cpu = Cpu::new();
    let reg = cpu.registers();
    assert_eq!(reg.pc, 0);
    assert_eq!(reg.sp, 0xFFFF);
    assert_eq!(reg.af, 0xFFFF);
    assert!(!reg.iff1 && !reg.iff2);
    assert_eq!(reg.im, 0);
    assert!(!reg.halted);
    assert_eq!(cpu.cycles(), 0);
    assert_eq!(cpu.deficit(), 0);
}

#[test]
fn reset_is_idempotent() {
    let mut a = Cpu::new();
    let mut b = Cpu::new();
    a.reset();
    a.reset();
    b.reset();
    assert_eq!(a.registers(), b.registers());
    assert_eq!(a.cycles(), b.cycles());
}

#[test]
fn reset_clears_running_state() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0x76]); // HALT
    cpu.step(&mut bus);
    cpu.nmi();
    cpu.interrupt(true, 0x12);
    cpu.reset();
    assert!(!cpu.halted());
    assert_eq!(cpu.cycles(), 0);
    // Neither latch survives the reset.
    assert_eq!(cpu.step(&mut bus), 4);
    assert_eq!(cpu.registers().pc, 1);
}

// ========== Cycle-budgeted Stepping ==========

#[test]
fn step_cycles_within_budget() {
    let (mut cpu, mut bus) = new_cpu(); // NOP sled
    assert_eq!(cpu.step_cycles(&mut bus, 100), 4);
    assert_eq!(cpu.deficit(), 0);
}

#[test]
fn step_cycles_builds_and_pays_deficit() {
    let (mut cpu, mut bus) = new_cpu(); // NOPs cost 4 each
    assert_eq!(cpu.step_cycles(&mut bus, 3), 3);
    assert_eq!(cpu.deficit(), 1);
    // Deficit is paid before anything else runs.
    assert_eq!(cpu.step_cycles(&mut bus, 3), 1);
    assert_eq!(cpu.deficit(), 0);
    assert_eq!(cpu.registers().pc, 1, "only one NOP has executed");
    assert_eq!(cpu.step_cycles(&mut bus, 3), 3);
    assert_eq!(cpu.step_cycles(&mut bus, 3), 1);
    assert_eq!(cpu.cycles(), 8);
}

#[test]
fn step_cycles_pays_deficit_across_calls() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0xCD, 0x00, 0x50]); // CALL (17 cycles)
    cpu.set_registers(Registers {
        sp: 0xFFFE,
        ..cpu.registers()
    });
    assert_eq!(cpu.step_cycles(&mut bus, 1), 1);
    assert_eq!(cpu.deficit(), 16);
    assert_eq!(cpu.step_cycles(&mut bus, 10), 10);
    assert_eq!(cpu.deficit(), 6);
    assert_eq!(cpu.step_cycles(&mut bus, 10), 6);
    assert_eq!(cpu.deficit(), 0);
    assert_eq!(cpu.registers().pc, 0x5000);
}

#[test]
fn cycle_counter_accumulates() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0x00, 0x06, 0x12, 0xC3, 0x00, 0x10]); // NOP; LD B,n; JP
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.cycles(), 4 + 7 + 10);
}

// ========== Snapshots ==========

#[test]
fn snapshot_round_trip() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0x21, 0x34, 0x12, 0x31, 0xFE, 0x7F, 0x3E, 0x55]);
    cpu.step(&mut bus); // LD HL,nn
    cpu.step(&mut bus); // LD SP,nn
    cpu.step(&mut bus); // LD A,n
    cpu.interrupt(true, 0x42);
    cpu.nmi();

    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE];
    cpu.serialize(&mut buf).unwrap();

    let mut restored = Cpu::new();
    restored.deserialize(&buf).unwrap();
    assert_eq!(restored.registers(), cpu.registers());
    assert_eq!(restored.cycles(), cpu.cycles());
    assert_eq!(restored.deficit(), cpu.deficit());

    // Re-serializing reproduces the identical snapshot, interrupt
    // latches included.
    let mut buf2 = [0u8; Cpu::SNAPSHOT_SIZE];
    restored.serialize(&mut buf2).unwrap();
    assert_eq!(buf, buf2);

    // The NMI latch travels with the snapshot.
    assert_eq!(restored.step(&mut bus), 11);
    assert_eq!(restored.registers().pc, 0x0066);
}

#[test]
fn snapshot_layout_is_stable() {
    let mut cpu = Cpu::new();
    cpu.set_registers(Registers {
        af: 0x1122,
        pc: 0xABCD,
        im: 2,
        halted: true,
        ..cpu.registers()
    });
    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE];
    cpu.serialize(&mut buf).unwrap();
    assert_eq!(buf[0], 1, "version byte");
    assert_eq!(&buf[1..3], &[0x22, 0x11], "AF little-endian");
    assert_eq!(&buf[23..25], &[0xCD, 0xAB], "PC little-endian");
    assert_eq!(buf[29], 2, "IM byte");
    assert_eq!(buf[30], 1, "halt byte");
}

#[test]
fn snapshot_preserves_deficit() {
    let (mut cpu, mut bus) = new_cpu();
    cpu.step_cycles(&mut bus, 1); // NOP leaves a deficit of 3
    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE];
    cpu.serialize(&mut buf).unwrap();

    let mut restored = Cpu::new();
    restored.deserialize(&buf).unwrap();
    assert_eq!(restored.deficit(), 3);
    assert_eq!(restored.step_cycles(&mut bus, 100), 3);
}

#[test]
fn serialize_rejects_short_buffer() {
    let cpu = Cpu::new();
    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE - 1];
    assert_eq!(cpu.serialize(&mut buf), Err(SnapshotError::BufferTooSmall));
}

#[test]
fn deserialize_rejects_short_buffer_and_bad_version() {
    let mut cpu = Cpu::new();
    let buf = [0u8; Cpu::SNAPSHOT_SIZE - 1];
    assert_eq!(cpu.deserialize(&buf), Err(SnapshotError::BufferTooSmall));

    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE];
    Cpu::new().serialize(&mut buf).unwrap();
    buf[0] = 9;
    assert_eq!(cpu.deserialize(&buf), Err(SnapshotError::UnsupportedVersion(9)));
}

#[test]
fn deserialize_rebinds_index_to_hl() {
    // A snapshot taken between instructions always resumes with the HL
    // slot bound to HL, so an unprefixed LD H,n must hit HL.
    let (mut cpu, mut bus) = new_cpu();
    let mut buf = [0u8; Cpu::SNAPSHOT_SIZE];
    cpu.serialize(&mut buf).unwrap();
    cpu.deserialize(&buf).unwrap();
    bus.load(0, &[0x26, 0x9A]); // LD H,0x9A
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().hl & 0xFF00, 0x9A00);
    assert_eq!(cpu.registers().ix, 0);
}

// ========== Cycle-carrying Bus ==========

#[test]
fn cycled_bus_receives_step_start_counter() {
    let mut cpu = Cpu::new();
    let mut bus = CycleBus::new();
    bus.mem[1] = 0x3A; // NOP; LD A,(0x8000)
    bus.mem[2] = 0x00;
    bus.mem[3] = 0x80;

    cpu.step(&mut bus);
    assert_eq!(bus.last_fetch, Some(0));

    cpu.step(&mut bus);
    assert_eq!(bus.last_fetch, Some(4), "second step starts after the NOP");
    assert_eq!(bus.last_read, Some(4), "reads carry the step-start counter");
}

#[test]
fn cycled_bus_stamps_writes_and_io() {
    let mut cpu = Cpu::new();
    let mut bus = CycleBus::new();
    bus.mem[0] = 0x00; // NOP
    bus.mem[1] = 0xD5; // PUSH DE
    bus.mem[2] = 0xD3; // OUT (n),A
    bus.mem[3] = 0x01;
    bus.mem[4] = 0xDB; // IN A,(n)
    bus.mem[5] = 0x02;

    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(bus.last_write, Some(4));
    cpu.step(&mut bus);
    assert_eq!(bus.last_output, Some(15));
    cpu.step(&mut bus);
    assert_eq!(bus.last_input, Some(26));
}

#[test]
fn plain_bus_defaults_still_work() {
    // A bus that only implements the five plain methods gets every access
    // through the defaulted cycled variants.
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0x3E, 0x42, 0x32, 0x00, 0x80]); // LD A,n; LD (nn),A
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(bus.mem[0x8000], 0x42);
}

// ========== Refresh Counter ==========

#[test]
fn refresh_low_bits_count_m1_fetches() {
    let (mut cpu, mut bus) = new_cpu(); // NOP sled
    for _ in 0..10 {
        cpu.step(&mut bus);
    }
    assert_eq!(cpu.registers().r, 10);
}

#[test]
fn refresh_bit7_is_preserved() {
    let (mut cpu, mut bus) = new_cpu();
    cpu.set_registers(Registers {
        r: 0xFE,
        ..Registers::default()
    });
    for _ in 0..4 {
        cpu.step(&mut bus);
    }
    // Low 7 bits wrap from 0x7E to 0x02; bit 7 stays put.
    assert_eq!(cpu.registers().r, 0x82);
}

#[test]
fn prefixed_opcodes_fetch_twice() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0xCB, 0x00, 0xDD, 0xCB, 0x00, 0x06]); // RLC B; RLC (IX+0)
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().r, 2, "CB counts two M1 cycles");
    cpu.step(&mut bus);
    // DD CB: only the two prefix bytes are M1 fetches.
    assert_eq!(cpu.registers().r, 4);
}

#[test]
fn ld_r_a_writes_all_eight_bits() {
    let (mut cpu, mut bus) = new_cpu();
    bus.load(0, &[0xED, 0x4F]); // LD R,A
    cpu.set_registers(Registers {
        af: 0x0000,
        r: 0xFF,
        ..Registers::default()
    });
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().r, 0, "explicit write replaces bit 7 too");
}
