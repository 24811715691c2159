//! Register access, instruction fetch, and stack helpers.
//!
//! Instructions encode 8-bit operands in 3-bit fields (0=B, 1=C, 2=D, 3=E,
//! 4=H, 5=L, 6=(HL), 7=A) and 16-bit operands in 2-bit fields. Both kinds of
//! indexed access route the HL positions through the active index register
//! so that a DD/FD prefix transparently retargets them to IX or IY.

use super::flags;
use super::{Cpu, IndexReg};
use crate::bus::Bus;

impl Cpu {
    // ========== Named Register Accessors ==========

    /// Get the accumulator (high byte of AF)
    #[inline]
    pub(super) fn a(&self) -> u8 {
        (self.reg.af >> 8) as u8
    }

    /// Set the accumulator
    #[inline]
    pub(super) fn set_a(&mut self, val: u8) {
        self.reg.af = u16::from(val) << 8 | self.reg.af & 0xFF;
    }

    /// Get the flags register (low byte of AF)
    #[inline]
    pub(super) fn f(&self) -> u8 {
        self.reg.af as u8
    }

    /// Set the flags register
    #[inline]
    pub(super) fn set_f(&mut self, val: u8) {
        self.reg.af = self.reg.af & 0xFF00 | u16::from(val);
    }

    #[inline]
    pub(super) fn b(&self) -> u8 {
        (self.reg.bc >> 8) as u8
    }

    #[inline]
    pub(super) fn set_b(&mut self, val: u8) {
        self.reg.bc = u16::from(val) << 8 | self.reg.bc & 0xFF;
    }

    #[inline]
    pub(super) fn c(&self) -> u8 {
        self.reg.bc as u8
    }

    #[inline]
    pub(super) fn set_c(&mut self, val: u8) {
        self.reg.bc = self.reg.bc & 0xFF00 | u16::from(val);
    }

    #[inline]
    pub(super) fn d(&self) -> u8 {
        (self.reg.de >> 8) as u8
    }

    #[inline]
    pub(super) fn set_d(&mut self, val: u8) {
        self.reg.de = u16::from(val) << 8 | self.reg.de & 0xFF;
    }

    #[inline]
    pub(super) fn e(&self) -> u8 {
        self.reg.de as u8
    }

    #[inline]
    pub(super) fn set_e(&mut self, val: u8) {
        self.reg.de = self.reg.de & 0xFF00 | u16::from(val);
    }

    /// Get H - the high byte of the active HL/IX/IY register
    #[inline]
    pub(super) fn h(&self) -> u8 {
        (self.index_reg() >> 8) as u8
    }

    /// Set H - the high byte of the active HL/IX/IY register
    #[inline]
    pub(super) fn set_h(&mut self, val: u8) {
        let pair = u16::from(val) << 8 | self.index_reg() & 0xFF;
        self.set_index_reg(pair);
    }

    /// Get L - the low byte of the active HL/IX/IY register
    #[inline]
    pub(super) fn l(&self) -> u8 {
        self.index_reg() as u8
    }

    /// Set L - the low byte of the active HL/IX/IY register
    #[inline]
    pub(super) fn set_l(&mut self, val: u8) {
        let pair = self.index_reg() & 0xFF00 | u16::from(val);
        self.set_index_reg(pair);
    }

    // ========== Index Register Selection ==========

    /// Value of the register currently bound to the HL slot.
    ///
    /// Between instructions this is always HL; a DD or FD prefix rebinds it
    /// to IX or IY for the duration of one instruction.
    #[inline]
    pub(super) fn index_reg(&self) -> u16 {
        match self.index {
            IndexReg::Hl => self.reg.hl,
            IndexReg::Ix => self.reg.ix,
            IndexReg::Iy => self.reg.iy,
        }
    }

    /// Write the register currently bound to the HL slot.
    #[inline]
    pub(super) fn set_index_reg(&mut self, val: u16) {
        match self.index {
            IndexReg::Hl => self.reg.hl = val,
            IndexReg::Ix => self.reg.ix = val,
            IndexReg::Iy => self.reg.iy = val,
        }
    }

    /// Fetch a displacement byte and return `index + sign_extend(d)`.
    pub(super) fn index_addr(&mut self, bus: &mut impl Bus) -> u16 {
        let d = self.fetch_byte(bus) as i8;
        self.index_reg().wrapping_add(d as u16)
    }

    // ========== Bus Dispatch ==========
    // All access funnels through the cycle-stamped trait methods; the stamp
    // is the counter at the start of the current step.

    #[inline]
    pub(super) fn read_bus(&mut self, bus: &mut impl Bus, addr: u16) -> u8 {
        bus.read_cycled(self.cycles, addr)
    }

    #[inline]
    pub(super) fn write_bus(&mut self, bus: &mut impl Bus, addr: u16, val: u8) {
        bus.write_cycled(self.cycles, addr, val);
    }

    #[inline]
    pub(super) fn in_bus(&mut self, bus: &mut impl Bus, port: u16) -> u8 {
        bus.input_cycled(self.cycles, port)
    }

    #[inline]
    pub(super) fn out_bus(&mut self, bus: &mut impl Bus, port: u16, val: u8) {
        bus.output_cycled(self.cycles, port, val);
    }

    // ========== Instruction Fetch ==========

    /// Read the byte at PC via an M1 (opcode fetch) bus cycle and advance PC.
    /// Increments the low 7 bits of R; bit 7 is preserved.
    #[inline]
    pub(super) fn fetch_opcode(&mut self, bus: &mut impl Bus) -> u8 {
        let val = bus.fetch_cycled(self.cycles, self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        self.reg.r = self.reg.r & 0x80 | self.reg.r.wrapping_add(1) & 0x7F;
        val
    }

    /// Read the byte at PC (plain data read) and advance PC.
    #[inline]
    pub(super) fn fetch_byte(&mut self, bus: &mut impl Bus) -> u8 {
        let val = self.read_bus(bus, self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        val
    }

    /// Read a little-endian 16-bit word at PC and advance PC by 2.
    #[inline]
    pub(super) fn fetch_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = u16::from(self.fetch_byte(bus));
        let hi = u16::from(self.fetch_byte(bus));
        hi << 8 | lo
    }

    // ========== Memory and Stack ==========

    /// Read a little-endian 16-bit word from `addr`.
    pub(super) fn read_word(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let lo = u16::from(self.read_bus(bus, addr));
        let hi = u16::from(self.read_bus(bus, addr.wrapping_add(1)));
        hi << 8 | lo
    }

    /// Write a little-endian 16-bit word to `addr`.
    pub(super) fn write_word(&mut self, bus: &mut impl Bus, addr: u16, val: u16) {
        self.write_bus(bus, addr, val as u8);
        self.write_bus(bus, addr.wrapping_add(1), (val >> 8) as u8);
    }

    /// Push a 16-bit value onto the stack (high byte at SP-1, low at SP-2).
    pub(super) fn push_word(&mut self, bus: &mut impl Bus, val: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(1);
        self.write_bus(bus, self.reg.sp, (val >> 8) as u8);
        self.reg.sp = self.reg.sp.wrapping_sub(1);
        self.write_bus(bus, self.reg.sp, val as u8);
    }

    /// Pop a 16-bit value from the stack.
    pub(super) fn pop_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = u16::from(self.read_bus(bus, self.reg.sp));
        self.reg.sp = self.reg.sp.wrapping_add(1);
        let hi = u16::from(self.read_bus(bus, self.reg.sp));
        self.reg.sp = self.reg.sp.wrapping_add(1);
        hi << 8 | lo
    }

    // ========== Indexed Register Access ==========

    /// Get an 8-bit operand by 3-bit field. Indices 4 and 5 route through
    /// the active index register; index 6 reads memory at (HL).
    pub(super) fn reg8(&mut self, bus: &mut impl Bus, idx: u8) -> u8 {
        match idx {
            0 => self.b(),
            1 => self.c(),
            2 => self.d(),
            3 => self.e(),
            4 => self.h(),
            5 => self.l(),
            6 => {
                let addr = self.reg.hl;
                self.read_bus(bus, addr)
            }
            _ => self.a(),
        }
    }

    /// Set an 8-bit operand by 3-bit field. Same routing as [`Cpu::reg8`].
    pub(super) fn set_reg8(&mut self, bus: &mut impl Bus, idx: u8, val: u8) {
        match idx {
            0 => self.set_b(val),
            1 => self.set_c(val),
            2 => self.set_d(val),
            3 => self.set_e(val),
            4 => self.set_h(val),
            5 => self.set_l(val),
            6 => {
                let addr = self.reg.hl;
                self.write_bus(bus, addr, val);
            }
            _ => self.set_a(val),
        }
    }

    /// Get an 8-bit register by field without index redirection: 4 and 5
    /// are the true H and L even under a DD/FD prefix. Index 6 is never
    /// passed here.
    pub(super) fn reg8_direct(&self, idx: u8) -> u8 {
        match idx {
            0 => self.b(),
            1 => self.c(),
            2 => self.d(),
            3 => self.e(),
            4 => (self.reg.hl >> 8) as u8,
            5 => self.reg.hl as u8,
            6 => 0,
            _ => self.a(),
        }
    }

    /// Set an 8-bit register by field without index redirection.
    pub(super) fn set_reg8_direct(&mut self, idx: u8, val: u8) {
        match idx {
            0 => self.set_b(val),
            1 => self.set_c(val),
            2 => self.set_d(val),
            3 => self.set_e(val),
            4 => self.reg.hl = u16::from(val) << 8 | self.reg.hl & 0xFF,
            5 => self.reg.hl = self.reg.hl & 0xFF00 | u16::from(val),
            6 => {}
            _ => self.set_a(val),
        }
    }

    /// Get a 16-bit register pair by 2-bit field (0=BC, 1=DE, 2=HL/IX/IY,
    /// 3=SP).
    pub(super) fn rp(&self, idx: u8) -> u16 {
        match idx {
            0 => self.reg.bc,
            1 => self.reg.de,
            2 => self.index_reg(),
            _ => self.reg.sp,
        }
    }

    /// Set a 16-bit register pair by 2-bit field.
    pub(super) fn set_rp(&mut self, idx: u8, val: u16) {
        match idx {
            0 => self.reg.bc = val,
            1 => self.reg.de = val,
            2 => self.set_index_reg(val),
            _ => self.reg.sp = val,
        }
    }

    /// Get a register pair for PUSH/POP (0=BC, 1=DE, 2=HL/IX/IY, 3=AF).
    pub(super) fn rp2(&self, idx: u8) -> u16 {
        match idx {
            0 => self.reg.bc,
            1 => self.reg.de,
            2 => self.index_reg(),
            _ => self.reg.af,
        }
    }

    /// Set a register pair for PUSH/POP.
    pub(super) fn set_rp2(&mut self, idx: u8, val: u16) {
        match idx {
            0 => self.reg.bc = val,
            1 => self.reg.de = val,
            2 => self.set_index_reg(val),
            _ => self.reg.af = val,
        }
    }

    // ========== Condition Codes ==========

    /// Evaluate a 3-bit condition code against the current flags.
    /// 0=NZ, 1=Z, 2=NC, 3=C, 4=PO, 5=PE, 6=P, 7=M
    pub(super) fn check_cc(&self, cc: u8) -> bool {
        let f = self.f();
        match cc {
            0 => f & flags::Z == 0,
            1 => f & flags::Z != 0,
            2 => f & flags::C == 0,
            3 => f & flags::C != 0,
            4 => f & flags::PV == 0,
            5 => f & flags::PV != 0,
            6 => f & flags::S == 0,
            _ => f & flags::S != 0,
        }
    }
}
