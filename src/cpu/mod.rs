//! Zilog Z80 CPU implementation.
//!
//! The CPU is a pure state machine: all memory and I/O flows through the
//! host's [`Bus`] implementation, and one [`Cpu::step`] call executes
//! exactly one event (an interrupt service, a halted no-op tick, or one
//! instruction) and returns its T-state cost.
//!
//! # Module Organization
//!
//! - `flags`: flag bit constants and flag computation for the F register
//! - `helpers`: register access, instruction fetch, stack operations
//! - `execute`: instruction execution for all five opcode pages
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)
//! - Sean Young, "The Undocumented Z80 Documented"

use byteorder::{ByteOrder, LittleEndian};

use crate::bus::Bus;

mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

/// Programmer-visible register state of the Z80.
///
/// Register pairs are stored as `u16` with the high byte first: AF has A in
/// bits 15-8 and F in bits 7-0. Individual registers can be extracted with
/// shifts and masks (e.g. `A = AF >> 8`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    /// Accumulator and flags
    pub af: u16,
    /// BC register pair
    pub bc: u16,
    /// DE register pair
    pub de: u16,
    /// HL register pair
    pub hl: u16,
    /// Shadow AF
    pub af_prime: u16,
    /// Shadow BC
    pub bc_prime: u16,
    /// Shadow DE
    pub de_prime: u16,
    /// Shadow HL
    pub hl_prime: u16,
    /// IX index register
    pub ix: u16,
    /// IY index register
    pub iy: u16,
    /// Stack pointer
    pub sp: u16,
    /// Program counter
    pub pc: u16,
    /// Interrupt vector base
    pub i: u8,
    /// Refresh counter (low 7 bits count M1 fetches, bit 7 is preserved)
    pub r: u8,
    /// Interrupt enable flip-flop
    pub iff1: bool,
    /// Saved copy of IFF1, restored by RETN
    pub iff2: bool,
    /// Interrupt mode (0, 1, or 2; other values behave as 0)
    pub im: u8,
    /// True while executing HALT
    pub halted: bool,
}

/// Register currently bound to the HL slot of the instruction encoding.
/// DD and FD prefixes rebind it to IX or IY for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexReg {
    Hl,
    Ix,
    Iy,
}

/// Z80 CPU state.
///
/// Construct with [`Cpu::new`] (which performs a reset), then drive it with
/// [`Cpu::step`] or [`Cpu::step_cycles`] against a host [`Bus`]. The
/// instance owns nothing but processor state; a single instance represents
/// a single processor and is not internally synchronized.
pub struct Cpu {
    reg: Registers,
    cycles: u64,

    // Interrupt state.
    int_line: bool, // INT line level (active when true)
    int_data: u8,   // Data bus value for interrupt acknowledge
    nmi_pending: bool, // NMI edge latch (consumed on next step)
    after_ei: bool, // Suppress interrupts for one instruction after EI

    // Cycle debt from step_cycles when an instruction's cost exceeded
    // the budget.
    deficit: i32,

    // DD/FD prefix support.
    index: IndexReg,
    // Precomputed effective address for DD CB / FD CB instructions.
    idx_addr: u16,
}

impl Cpu {
    /// Create a CPU in the post-reset state.
    pub fn new() -> Self {
        let mut cpu = Self {
            reg: Registers::default(),
            cycles: 0,
            int_line: false,
            int_data: 0xFF,
            nmi_pending: false,
            after_ei: false,
            deficit: 0,
            index: IndexReg::Hl,
            idx_addr: 0,
        };
        cpu.reset();
        cpu
    }

    /// Reset the CPU to its power-on state: PC=0, SP=0xFFFF, AF=0xFFFF,
    /// interrupts disabled, IM 0, HALT cleared, cycle counter zero.
    /// The bus is not touched.
    pub fn reset(&mut self) {
        self.reg = Registers {
            af: 0xFFFF,
            sp: 0xFFFF,
            ..Registers::default()
        };
        self.cycles = 0;
        self.int_line = false;
        self.int_data = 0xFF;
        self.nmi_pending = false;
        self.after_ei = false;
        self.deficit = 0;
        self.index = IndexReg::Hl;
        self.idx_addr = 0;
    }

    // ========== Stepper ==========

    /// Execute a single event and return the T-states consumed.
    ///
    /// Processing order each call:
    /// 1. If an NMI is latched, service it (11 T-states).
    /// 2. If INT is asserted, IFF1 is set, and the EI suppression window
    ///    has passed, service the maskable interrupt (cost depends on IM).
    /// 3. If halted, burn 4 T-states (internal NOP).
    /// 4. Otherwise fetch and execute the next instruction.
    pub fn step(&mut self, bus: &mut impl Bus) -> u32 {
        // NMI has the highest priority.
        if self.nmi_pending {
            self.nmi_pending = false;
            let cost = self.service_nmi(bus);
            self.cycles += u64::from(cost);
            return cost;
        }

        // Maskable interrupt, subject to IFF1 and the EI window.
        if self.int_line && self.reg.iff1 && !self.after_ei {
            let cost = self.service_int(bus);
            self.cycles += u64::from(cost);
            return cost;
        }
        self.after_ei = false;

        // HALT burns NOP cycles until an interrupt arrives.
        if self.reg.halted {
            self.cycles += 4;
            return 4;
        }

        let cost = self.execute(bus);
        self.cycles += u64::from(cost);
        cost
    }

    /// Execute a single instruction within the given cycle budget.
    ///
    /// If a previous instruction's cost exceeded its budget, the deficit is
    /// paid down first without executing anything. When an instruction's
    /// cost exceeds the budget, the excess is stored as a deficit to be
    /// charged on subsequent calls. Returns the cycles consumed from the
    /// budget.
    pub fn step_cycles(&mut self, bus: &mut impl Bus, budget: u32) -> u32 {
        if self.deficit > 0 {
            if budget >= self.deficit as u32 {
                let n = self.deficit as u32;
                self.deficit = 0;
                return n;
            }
            self.deficit -= budget as i32;
            return budget;
        }

        let cost = self.step(bus);
        if cost <= budget {
            return cost;
        }
        self.deficit = (cost - budget) as i32;
        budget
    }

    // ========== Interrupt Lines ==========

    /// Assert or deassert the maskable interrupt line.
    ///
    /// The line is level-sensitive: while asserted, the CPU samples it at
    /// the start of each step and services it when IFF1 is set and the EI
    /// suppression window has passed. `data` is the byte the interrupting
    /// device places on the data bus during the acknowledge cycle:
    /// - IM 0: executed as an instruction (an RST opcode; anything else
    ///   behaves as IM 1)
    /// - IM 1: ignored (always calls 0x0038)
    /// - IM 2: combined with the I register into a vector table address
    pub fn interrupt(&mut self, asserted: bool, data: u8) {
        self.int_line = asserted;
        self.int_data = data;
    }

    /// Latch a non-maskable interrupt (edge-triggered).
    ///
    /// The NMI is serviced at the start of the next [`Cpu::step`] call.
    /// Multiple calls before that step collapse into one.
    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Service a non-maskable interrupt: exit HALT, save IFF1 into IFF2,
    /// clear IFF1, push PC, jump to 0x0066.
    fn service_nmi(&mut self, bus: &mut impl Bus) -> u32 {
        log::trace!("servicing NMI at pc={:#06x}", self.reg.pc);
        self.reg.halted = false;
        self.reg.iff2 = self.reg.iff1;
        self.reg.iff1 = false;
        let pc = self.reg.pc;
        self.push_word(bus, pc);
        self.reg.pc = 0x0066;
        11
    }

    /// Service a maskable interrupt according to the current interrupt
    /// mode. Modes outside 0..=2 behave as mode 0.
    fn service_int(&mut self, bus: &mut impl Bus) -> u32 {
        log::trace!(
            "servicing INT at pc={:#06x}, im={} data={:#04x}",
            self.reg.pc,
            self.reg.im,
            self.int_data
        );
        self.reg.halted = false;
        self.reg.iff1 = false;
        self.reg.iff2 = false;
        self.after_ei = false;

        match self.reg.im {
            1 => self.service_im1(bus),
            2 => self.service_im2(bus),
            _ => self.service_im0(bus),
        }
    }

    /// IM 0: execute the data bus value as an instruction. Devices supply a
    /// single-byte RST (bit pattern 11xxx111); anything else behaves as
    /// IM 1.
    fn service_im0(&mut self, bus: &mut impl Bus) -> u32 {
        if self.int_data & 0xC7 == 0xC7 {
            let pc = self.reg.pc;
            self.push_word(bus, pc);
            self.reg.pc = u16::from(self.int_data & 0x38);
            return 11;
        }
        self.service_im1(bus)
    }

    /// IM 1: push PC, call 0x0038.
    fn service_im1(&mut self, bus: &mut impl Bus) -> u32 {
        let pc = self.reg.pc;
        self.push_word(bus, pc);
        self.reg.pc = 0x0038;
        13
    }

    /// IM 2: push PC, read the handler address from the vector table at
    /// `(I << 8) | (data & 0xFE)`.
    fn service_im2(&mut self, bus: &mut impl Bus) -> u32 {
        let pc = self.reg.pc;
        self.push_word(bus, pc);
        let table = u16::from(self.reg.i) << 8 | u16::from(self.int_data & 0xFE);
        self.reg.pc = self.read_word(bus, table);
        19
    }

    // ========== Observation ==========

    /// Total T-state count since the last reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// True if the CPU is in HALT state, waiting for an interrupt.
    pub fn halted(&self) -> bool {
        self.reg.halted
    }

    /// Remaining cycle debt from a [`Cpu::step_cycles`] call where the
    /// instruction cost exceeded the budget.
    pub fn deficit(&self) -> i32 {
        self.deficit
    }

    /// Snapshot of the current register state.
    pub fn registers(&self) -> Registers {
        self.reg
    }

    /// Replace the entire register file without performing a reset.
    /// Intended for tests and state restoration.
    pub fn set_registers(&mut self, reg: Registers) {
        self.reg = reg;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// ========== State Persistence ==========

/// Snapshot (de)serialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    /// The provided buffer is shorter than [`Cpu::SNAPSHOT_SIZE`]
    BufferTooSmall,
    /// The snapshot was produced by an unknown format version
    UnsupportedVersion(u8),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::BufferTooSmall => {
                write!(f, "snapshot buffer shorter than {} bytes", Cpu::SNAPSHOT_SIZE)
            }
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "unsupported snapshot version {v}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

const SNAPSHOT_VERSION: u8 = 1;

impl Cpu {
    /// Size of a CPU state snapshot in bytes.
    pub const SNAPSHOT_SIZE: usize = 47;

    /// Write the complete CPU state into `buf` in a fixed little-endian
    /// binary layout: version byte, the 12 register pairs, I and R, the
    /// IFF1/IFF2/IM/HALT bytes, the 64-bit cycle counter, the 32-bit
    /// deficit, and the interrupt latches. Bus state is not included; the
    /// host persists memory and I/O state separately.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<(), SnapshotError> {
        if buf.len() < Self::SNAPSHOT_SIZE {
            return Err(SnapshotError::BufferTooSmall);
        }

        buf[0] = SNAPSHOT_VERSION;
        LittleEndian::write_u16(&mut buf[1..], self.reg.af);
        LittleEndian::write_u16(&mut buf[3..], self.reg.bc);
        LittleEndian::write_u16(&mut buf[5..], self.reg.de);
        LittleEndian::write_u16(&mut buf[7..], self.reg.hl);
        LittleEndian::write_u16(&mut buf[9..], self.reg.af_prime);
        LittleEndian::write_u16(&mut buf[11..], self.reg.bc_prime);
        LittleEndian::write_u16(&mut buf[13..], self.reg.de_prime);
        LittleEndian::write_u16(&mut buf[15..], self.reg.hl_prime);
        LittleEndian::write_u16(&mut buf[17..], self.reg.ix);
        LittleEndian::write_u16(&mut buf[19..], self.reg.iy);
        LittleEndian::write_u16(&mut buf[21..], self.reg.sp);
        LittleEndian::write_u16(&mut buf[23..], self.reg.pc);
        buf[25] = self.reg.i;
        buf[26] = self.reg.r;
        buf[27] = u8::from(self.reg.iff1);
        buf[28] = u8::from(self.reg.iff2);
        buf[29] = self.reg.im;
        buf[30] = u8::from(self.reg.halted);
        LittleEndian::write_u64(&mut buf[31..], self.cycles);
        LittleEndian::write_i32(&mut buf[39..], self.deficit);
        buf[43] = u8::from(self.int_line);
        buf[44] = self.int_data;
        buf[45] = u8::from(self.nmi_pending);
        buf[46] = u8::from(self.after_ei);
        Ok(())
    }

    /// Restore the complete CPU state from a buffer produced by
    /// [`Cpu::serialize`]. Fails on a short buffer or an unknown version.
    /// The active index register selection is reset to HL.
    pub fn deserialize(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        if buf.len() < Self::SNAPSHOT_SIZE {
            return Err(SnapshotError::BufferTooSmall);
        }
        if buf[0] != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(buf[0]));
        }

        self.reg.af = LittleEndian::read_u16(&buf[1..]);
        self.reg.bc = LittleEndian::read_u16(&buf[3..]);
        self.reg.de = LittleEndian::read_u16(&buf[5..]);
        self.reg.hl = LittleEndian::read_u16(&buf[7..]);
        self.reg.af_prime = LittleEndian::read_u16(&buf[9..]);
        self.reg.bc_prime = LittleEndian::read_u16(&buf[11..]);
        self.reg.de_prime = LittleEndian::read_u16(&buf[13..]);
        self.reg.hl_prime = LittleEndian::read_u16(&buf[15..]);
        self.reg.ix = LittleEndian::read_u16(&buf[17..]);
        self.reg.iy = LittleEndian::read_u16(&buf[19..]);
        self.reg.sp = LittleEndian::read_u16(&buf[21..]);
        self.reg.pc = LittleEndian::read_u16(&buf[23..]);
        self.reg.i = buf[25];
        self.reg.r = buf[26];
        self.reg.iff1 = buf[27] != 0;
        self.reg.iff2 = buf[28] != 0;
        self.reg.im = buf[29];
        self.reg.halted = buf[30] != 0;
        self.cycles = LittleEndian::read_u64(&buf[31..]);
        self.deficit = LittleEndian::read_i32(&buf[39..]);
        self.int_line = buf[43] != 0;
        self.int_data = buf[44];
        self.nmi_pending = buf[45] != 0;
        self.after_ei = buf[46] != 0;

        self.index = IndexReg::Hl;
        Ok(())
    }
}
