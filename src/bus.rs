//! Memory and I/O bus abstraction.
//!
//! The Z80 has separate address spaces for memory (64 KiB, accessed via the
//! MREQ signal) and I/O ports (accessed via IORQ). The host implements
//! [`Bus`] to map both spaces onto its RAM, ROM, and peripherals.
//!
//! The core never caches bus reads: every access goes through the trait at
//! the moment it occurs in the instruction model, in the same order as on
//! the real device within one instruction.

/// Host-supplied memory and I/O access for the CPU core.
///
/// Five byte-level operations cover all bus traffic. Hosts that need to know
/// the exact T-state of each transaction (cycle-accurate peripherals,
/// contended-memory timing) additionally override the `*_cycled` variants,
/// which receive the CPU's cycle counter; the default implementations drop
/// the counter and delegate to the plain methods, so most hosts implement
/// only the five plain operations.
///
/// The cycle value passed to the `*_cycled` methods is the counter as it
/// stood at the start of the current step; the instruction's full T-state
/// cost is added once the instruction completes. This convention is applied
/// uniformly to every access.
pub trait Bus {
    /// Read an opcode byte during an M1 (opcode fetch) machine cycle.
    ///
    /// On real hardware the M1 signal is asserted during this access, which
    /// some systems use for wait-state insertion, memory contention timing,
    /// or bank switching. Hosts that don't distinguish M1 from data reads
    /// can simply delegate to [`Bus::read`].
    fn fetch(&mut self, addr: u16) -> u8;

    /// Read a byte from the given memory address (non-M1 data read).
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to the given memory address.
    fn write(&mut self, addr: u16, val: u8);

    /// Read a byte from the given I/O port.
    ///
    /// The full 16-bit address bus is provided: the low byte is the port
    /// number specified by the instruction, and the high byte is context
    /// dependent (register A for single-byte IN/OUT, register B for
    /// C-indexed and block I/O instructions).
    fn input(&mut self, port: u16) -> u8;

    /// Write a byte to the given I/O port. Same address convention as
    /// [`Bus::input`].
    fn output(&mut self, port: u16, val: u8);

    /// Cycle-stamped variant of [`Bus::fetch`].
    fn fetch_cycled(&mut self, _cycle: u64, addr: u16) -> u8 {
        self.fetch(addr)
    }

    /// Cycle-stamped variant of [`Bus::read`].
    fn read_cycled(&mut self, _cycle: u64, addr: u16) -> u8 {
        self.read(addr)
    }

    /// Cycle-stamped variant of [`Bus::write`].
    fn write_cycled(&mut self, _cycle: u64, addr: u16, val: u8) {
        self.write(addr, val)
    }

    /// Cycle-stamped variant of [`Bus::input`].
    fn input_cycled(&mut self, _cycle: u64, port: u16) -> u8 {
        self.input(port)
    }

    /// Cycle-stamped variant of [`Bus::output`].
    fn output_cycled(&mut self, _cycle: u64, port: u16, val: u8) {
        self.output(port, val)
    }
}
