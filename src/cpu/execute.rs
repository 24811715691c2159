//! Instruction execution for all five opcode pages.
//!
//! Dispatch is a match over the opcode byte per page, decomposed into the
//! x/y/z/p/q fields (x = bits 7-6, y = bits 5-3, z = bits 2-0, p = y >> 1,
//! q = y & 1). The pages:
//!
//! - base: unprefixed opcodes (`execute_main`)
//! - CB: rotate/shift/bit operations (`execute_cb`)
//! - ED: extended operations and block transfers (`execute_ed`)
//! - DD/FD: IX/IY indexed operations (`execute_index`)
//! - DD CB / FD CB: indexed bit operations (`execute_index_cb`)
//!
//! Every execution function returns the T-state cost of the instruction;
//! the stepper adds it to the cycle counter once the instruction completes.

use super::flags::{
    self, add_flags, dec_flags, inc_flags, logic_flags, rot_shift, sub_flags, sz_flags, PARITY,
};
use super::{Cpu, IndexReg};
use crate::bus::Bus;

impl Cpu {
    /// Fetch and execute the instruction at PC, returning its T-state cost.
    pub(super) fn execute(&mut self, bus: &mut impl Bus) -> u32 {
        let op = self.fetch_opcode(bus);
        self.execute_main(bus, op)
    }

    /// Execute an unprefixed opcode.
    fn execute_main(&mut self, bus: &mut impl Bus, op: u8) -> u32 {
        let y = (op >> 3) & 7;
        let z = op & 7;
        match op >> 6 {
            0 => self.execute_x0(bus, y, z),
            1 => {
                if op == 0x76 {
                    // HALT. PC already points past the opcode, so the return
                    // address pushed by a later interrupt skips the HALT.
                    self.reg.halted = true;
                    4
                } else {
                    // LD r,r'
                    let val = self.reg8(bus, z);
                    self.set_reg8(bus, y, val);
                    if y == 6 || z == 6 {
                        7
                    } else {
                        4
                    }
                }
            }
            2 => {
                // ALU A,r
                let val = self.reg8(bus, z);
                self.alu_op(y, val);
                if z == 6 {
                    7
                } else {
                    4
                }
            }
            _ => self.execute_x3(bus, y, z),
        }
    }

    /// Execute x=0 opcodes (relative jumps, 16-bit loads/arithmetic,
    /// 8-bit loads/inc/dec, accumulator rotates and adjusts).
    fn execute_x0(&mut self, bus: &mut impl Bus, y: u8, z: u8) -> u32 {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => match y {
                0 => 4, // NOP
                1 => {
                    // EX AF,AF'
                    std::mem::swap(&mut self.reg.af, &mut self.reg.af_prime);
                    4
                }
                2 => {
                    // DJNZ d
                    let d = self.fetch_byte(bus) as i8;
                    let b = self.b().wrapping_sub(1);
                    self.set_b(b);
                    if b != 0 {
                        self.reg.pc = self.reg.pc.wrapping_add(d as u16);
                        13
                    } else {
                        8
                    }
                }
                3 => {
                    // JR d
                    let d = self.fetch_byte(bus) as i8;
                    self.reg.pc = self.reg.pc.wrapping_add(d as u16);
                    12
                }
                _ => {
                    // JR cc,d
                    let d = self.fetch_byte(bus) as i8;
                    if self.check_cc(y - 4) {
                        self.reg.pc = self.reg.pc.wrapping_add(d as u16);
                        12
                    } else {
                        7
                    }
                }
            },
            1 => {
                if q == 0 {
                    // LD rp,nn
                    let nn = self.fetch_word(bus);
                    self.set_rp(p, nn);
                    10
                } else {
                    // ADD HL,rp
                    let hl = self.index_reg();
                    let val = self.rp(p);
                    let result = u32::from(hl) + u32::from(val);
                    let r16 = result as u16;
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    if result > 0xFFFF {
                        f |= flags::C;
                    }
                    if (hl ^ val ^ r16) & 0x1000 != 0 {
                        f |= flags::H;
                    }
                    f |= (r16 >> 8) as u8 & (flags::F5 | flags::F3);
                    self.set_f(f);
                    self.set_index_reg(r16);
                    11
                }
            }
            2 => match (p, q) {
                (0, 0) => {
                    // LD (BC),A
                    let addr = self.reg.bc;
                    let a = self.a();
                    self.write_bus(bus, addr, a);
                    7
                }
                (1, 0) => {
                    // LD (DE),A
                    let addr = self.reg.de;
                    let a = self.a();
                    self.write_bus(bus, addr, a);
                    7
                }
                (2, 0) => {
                    // LD (nn),HL
                    let addr = self.fetch_word(bus);
                    let hl = self.index_reg();
                    self.write_word(bus, addr, hl);
                    16
                }
                (3, 0) => {
                    // LD (nn),A
                    let addr = self.fetch_word(bus);
                    let a = self.a();
                    self.write_bus(bus, addr, a);
                    13
                }
                (0, 1) => {
                    // LD A,(BC)
                    let addr = self.reg.bc;
                    let val = self.read_bus(bus, addr);
                    self.set_a(val);
                    7
                }
                (1, 1) => {
                    // LD A,(DE)
                    let addr = self.reg.de;
                    let val = self.read_bus(bus, addr);
                    self.set_a(val);
                    7
                }
                (2, 1) => {
                    // LD HL,(nn)
                    let addr = self.fetch_word(bus);
                    let val = self.read_word(bus, addr);
                    self.set_index_reg(val);
                    16
                }
                _ => {
                    // LD A,(nn)
                    let addr = self.fetch_word(bus);
                    let val = self.read_bus(bus, addr);
                    self.set_a(val);
                    13
                }
            },
            3 => {
                if q == 0 {
                    // INC rp
                    self.set_rp(p, self.rp(p).wrapping_add(1));
                } else {
                    // DEC rp
                    self.set_rp(p, self.rp(p).wrapping_sub(1));
                }
                6
            }
            4 => {
                // INC r
                let val = self.reg8(bus, y);
                let f = inc_flags(val) | self.f() & flags::C;
                self.set_reg8(bus, y, val.wrapping_add(1));
                self.set_f(f);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            5 => {
                // DEC r
                let val = self.reg8(bus, y);
                let f = dec_flags(val) | self.f() & flags::C;
                self.set_reg8(bus, y, val.wrapping_sub(1));
                self.set_f(f);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            6 => {
                // LD r,n
                let n = self.fetch_byte(bus);
                self.set_reg8(bus, y, n);
                if y == 6 {
                    10
                } else {
                    7
                }
            }
            _ => match y {
                0 => {
                    // RLCA
                    let a = self.a();
                    let bit7 = a >> 7;
                    let a = a << 1 | bit7;
                    self.set_a(a);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= a & (flags::F3 | flags::F5);
                    if bit7 != 0 {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
                1 => {
                    // RRCA
                    let a = self.a();
                    let bit0 = a & 1;
                    let a = a >> 1 | bit0 << 7;
                    self.set_a(a);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= a & (flags::F3 | flags::F5);
                    if bit0 != 0 {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
                2 => {
                    // RLA
                    let a = self.a();
                    let bit7 = a >> 7;
                    let a = a << 1 | self.f() & flags::C;
                    self.set_a(a);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= a & (flags::F3 | flags::F5);
                    if bit7 != 0 {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
                3 => {
                    // RRA
                    let a = self.a();
                    let bit0 = a & 1;
                    let a = a >> 1 | (self.f() & flags::C) << 7;
                    self.set_a(a);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= a & (flags::F3 | flags::F5);
                    if bit0 != 0 {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
                4 => {
                    // DAA
                    let a = self.a();
                    let f = self.f();
                    let mut correction: u8 = 0;
                    if f & flags::H != 0 || a & 0x0F > 9 {
                        correction |= 0x06;
                    }
                    let carry = f & flags::C != 0 || a > 0x99;
                    if carry {
                        correction |= 0x60;
                    }
                    let new_a = if f & flags::N != 0 {
                        a.wrapping_sub(correction)
                    } else {
                        a.wrapping_add(correction)
                    };
                    let mut new_f = sz_flags(new_a) | PARITY[new_a as usize] | f & flags::N;
                    if carry {
                        new_f |= flags::C;
                    }
                    if f & flags::N != 0 {
                        if f & flags::H != 0 && a & 0x0F < 6 {
                            new_f |= flags::H;
                        }
                    } else if a & 0x0F > 9 {
                        new_f |= flags::H;
                    }
                    self.set_a(new_a);
                    self.set_f(new_f);
                    4
                }
                5 => {
                    // CPL
                    let a = self.a() ^ 0xFF;
                    self.set_a(a);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV | flags::C);
                    f |= flags::H | flags::N;
                    f |= a & (flags::F3 | flags::F5);
                    self.set_f(f);
                    4
                }
                6 => {
                    // SCF
                    let a = self.a();
                    let old_f = self.f();
                    let mut f = old_f & (flags::S | flags::Z | flags::PV);
                    f |= flags::C;
                    f |= (a | old_f) & (flags::F3 | flags::F5);
                    self.set_f(f);
                    4
                }
                _ => {
                    // CCF
                    let a = self.a();
                    let old_f = self.f();
                    let mut f = old_f & (flags::S | flags::Z | flags::PV);
                    if old_f & flags::C != 0 {
                        f |= flags::H;
                    } else {
                        f |= flags::C;
                    }
                    f |= (a | old_f) & (flags::F3 | flags::F5);
                    self.set_f(f);
                    4
                }
            },
        }
    }

    /// Execute x=3 opcodes (control transfer, stack, I/O, prefixes).
    fn execute_x3(&mut self, bus: &mut impl Bus, y: u8, z: u8) -> u32 {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => {
                // RET cc
                if self.check_cc(y) {
                    self.reg.pc = self.pop_word(bus);
                    11
                } else {
                    5
                }
            }
            1 => {
                if q == 0 {
                    // POP rp2
                    let val = self.pop_word(bus);
                    self.set_rp2(p, val);
                    10
                } else {
                    match p {
                        0 => {
                            // RET
                            self.reg.pc = self.pop_word(bus);
                            10
                        }
                        1 => {
                            // EXX
                            std::mem::swap(&mut self.reg.bc, &mut self.reg.bc_prime);
                            std::mem::swap(&mut self.reg.de, &mut self.reg.de_prime);
                            std::mem::swap(&mut self.reg.hl, &mut self.reg.hl_prime);
                            4
                        }
                        2 => {
                            // JP (HL)
                            self.reg.pc = self.index_reg();
                            4
                        }
                        _ => {
                            // LD SP,HL
                            self.reg.sp = self.index_reg();
                            6
                        }
                    }
                }
            }
            2 => {
                // JP cc,nn
                let addr = self.fetch_word(bus);
                if self.check_cc(y) {
                    self.reg.pc = addr;
                }
                10
            }
            3 => match y {
                0 => {
                    // JP nn
                    self.reg.pc = self.fetch_word(bus);
                    10
                }
                1 => self.execute_cb(bus),
                2 => {
                    // OUT (n),A
                    let n = self.fetch_byte(bus);
                    let a = self.a();
                    let port = u16::from(a) << 8 | u16::from(n);
                    self.out_bus(bus, port, a);
                    11
                }
                3 => {
                    // IN A,(n)
                    let n = self.fetch_byte(bus);
                    let port = u16::from(self.a()) << 8 | u16::from(n);
                    let val = self.in_bus(bus, port);
                    self.set_a(val);
                    11
                }
                4 => {
                    // EX (SP),HL
                    let sp = self.reg.sp;
                    let val = self.read_word(bus, sp);
                    let hl = self.index_reg();
                    self.write_word(bus, sp, hl);
                    self.set_index_reg(val);
                    19
                }
                5 => {
                    // EX DE,HL
                    std::mem::swap(&mut self.reg.de, &mut self.reg.hl);
                    4
                }
                6 => {
                    // DI
                    self.reg.iff1 = false;
                    self.reg.iff2 = false;
                    4
                }
                _ => {
                    // EI - the instruction after EI always completes before
                    // a pending maskable interrupt is serviced.
                    self.reg.iff1 = true;
                    self.reg.iff2 = true;
                    self.after_ei = true;
                    4
                }
            },
            4 => {
                // CALL cc,nn
                let addr = self.fetch_word(bus);
                if self.check_cc(y) {
                    let pc = self.reg.pc;
                    self.push_word(bus, pc);
                    self.reg.pc = addr;
                    17
                } else {
                    10
                }
            }
            5 => {
                if q == 0 {
                    // PUSH rp2
                    let val = self.rp2(p);
                    self.push_word(bus, val);
                    11
                } else {
                    match p {
                        0 => {
                            // CALL nn
                            let addr = self.fetch_word(bus);
                            let pc = self.reg.pc;
                            self.push_word(bus, pc);
                            self.reg.pc = addr;
                            17
                        }
                        1 => self.execute_index(bus, IndexReg::Ix),
                        2 => self.execute_ed(bus),
                        _ => self.execute_index(bus, IndexReg::Iy),
                    }
                }
            }
            6 => {
                // ALU A,n
                let n = self.fetch_byte(bus);
                self.alu_op(y, n);
                7
            }
            _ => {
                // RST y*8
                let pc = self.reg.pc;
                self.push_word(bus, pc);
                self.reg.pc = u16::from(y) * 8;
                11
            }
        }
    }

    /// ALU operation on A. op: 0=ADD, 1=ADC, 2=SUB, 3=SBC, 4=AND, 5=XOR,
    /// 6=OR, 7=CP.
    fn alu_op(&mut self, op: u8, val: u8) {
        let a = self.a();
        let carry = self.f() & flags::C;
        match op {
            0 => {
                self.set_f(add_flags(a, val, 0));
                self.set_a(a.wrapping_add(val));
            }
            1 => {
                self.set_f(add_flags(a, val, carry));
                self.set_a(a.wrapping_add(val).wrapping_add(carry));
            }
            2 => {
                self.set_f(sub_flags(a, val, 0));
                self.set_a(a.wrapping_sub(val));
            }
            3 => {
                self.set_f(sub_flags(a, val, carry));
                self.set_a(a.wrapping_sub(val).wrapping_sub(carry));
            }
            4 => {
                let result = a & val;
                self.set_a(result);
                self.set_f(logic_flags(result, true));
            }
            5 => {
                let result = a ^ val;
                self.set_a(result);
                self.set_f(logic_flags(result, false));
            }
            6 => {
                let result = a | val;
                self.set_a(result);
                self.set_f(logic_flags(result, false));
            }
            _ => {
                // CP: F3/F5 come from the operand, not the result
                let f = sub_flags(a, val, 0);
                self.set_f(f & !(flags::F3 | flags::F5) | val & (flags::F3 | flags::F5));
            }
        }
    }

    // ========== CB Prefix (Rotate/Shift/Bit Operations) ==========

    /// Execute a CB-prefixed instruction. The second byte is an M1 fetch.
    fn execute_cb(&mut self, bus: &mut impl Bus) -> u32 {
        let op = self.fetch_opcode(bus);
        let y = (op >> 3) & 7;
        let z = op & 7;
        match op >> 6 {
            0 => {
                // Rotate/shift
                let val = self.reg8(bus, z);
                let (result, f) = rot_shift(y, val, self.f());
                self.set_reg8(bus, z, result);
                self.set_f(f);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            1 => {
                // BIT y,r
                let val = self.reg8(bus, z);
                let mut f = self.f() & flags::C | flags::H;
                if val & (1 << y) == 0 {
                    f |= flags::Z | flags::PV;
                }
                if y == 7 && val & 0x80 != 0 {
                    f |= flags::S;
                }
                // For (HL), F3/F5 come from the high byte of the address
                let src = if z == 6 { (self.reg.hl >> 8) as u8 } else { val };
                f |= src & (flags::F3 | flags::F5);
                self.set_f(f);
                if z == 6 {
                    12
                } else {
                    8
                }
            }
            2 => {
                // RES y,r
                let val = self.reg8(bus, z) & !(1 << y);
                self.set_reg8(bus, z, val);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            _ => {
                // SET y,r
                let val = self.reg8(bus, z) | 1 << y;
                self.set_reg8(bus, z, val);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
        }
    }

    // ========== ED Prefix (Extended Instructions) ==========

    /// Execute an ED-prefixed instruction. Bytes without an assigned
    /// operation are an 8-cycle no-op.
    fn execute_ed(&mut self, bus: &mut impl Bus) -> u32 {
        let op = self.fetch_opcode(bus);
        let y = (op >> 3) & 7;
        let z = op & 7;
        match op >> 6 {
            1 => self.execute_ed_x1(bus, y, z),
            2 if z <= 3 && y >= 4 => self.execute_block(bus, y, z),
            _ => {
                log::trace!("undefined ED opcode {op:#04x}");
                8
            }
        }
    }

    /// Execute ED-prefix x=1 opcodes (C-indexed I/O, 16-bit carry
    /// arithmetic, extended loads, NEG, RETN, IM, RRD/RLD).
    fn execute_ed_x1(&mut self, bus: &mut impl Bus, y: u8, z: u8) -> u32 {
        let p = y >> 1;
        let q = y & 1;
        match z {
            0 => {
                // IN r,(C) - y=6 is the undocumented IN (C), which only
                // sets the flags
                let port = self.reg.bc;
                let val = self.in_bus(bus, port);
                if y != 6 {
                    self.set_reg8(bus, y, val);
                }
                let f = sz_flags(val) | PARITY[val as usize] | self.f() & flags::C;
                self.set_f(f);
                12
            }
            1 => {
                // OUT (C),r - y=6 is the undocumented OUT (C),0
                let port = self.reg.bc;
                let val = if y == 6 { 0 } else { self.reg8(bus, y) };
                self.out_bus(bus, port, val);
                12
            }
            2 => {
                // SBC HL,rp / ADC HL,rp
                let hl = self.reg.hl;
                let val = self.rp(p);
                let carry = u32::from(self.f() & flags::C);
                let (result, mut f) = if q == 0 {
                    let result = u32::from(hl).wrapping_sub(u32::from(val)).wrapping_sub(carry);
                    let r16 = result as u16;
                    let mut f = (r16 >> 8) as u8 & (flags::S | flags::F5 | flags::F3) | flags::N;
                    // Overflow: operands different sign, result sign matches val
                    if (hl ^ val) & 0x8000 != 0 && (hl ^ r16) & 0x8000 != 0 {
                        f |= flags::PV;
                    }
                    (result, f)
                } else {
                    let result = u32::from(hl) + u32::from(val) + carry;
                    let r16 = result as u16;
                    let mut f = (r16 >> 8) as u8 & (flags::S | flags::F5 | flags::F3);
                    // Overflow: both operands same sign, result different
                    if (hl ^ val) & 0x8000 == 0 && (hl ^ r16) & 0x8000 != 0 {
                        f |= flags::PV;
                    }
                    (result, f)
                };
                let r16 = result as u16;
                if r16 == 0 {
                    f |= flags::Z;
                }
                if result > 0xFFFF {
                    f |= flags::C;
                }
                if (hl ^ val ^ r16) & 0x1000 != 0 {
                    f |= flags::H;
                }
                self.set_f(f);
                self.reg.hl = r16;
                15
            }
            3 => {
                // LD (nn),rp / LD rp,(nn)
                let addr = self.fetch_word(bus);
                if q == 0 {
                    let val = self.rp(p);
                    self.write_word(bus, addr, val);
                } else {
                    let val = self.read_word(bus, addr);
                    self.set_rp(p, val);
                }
                20
            }
            4 => {
                // NEG (documented at y=0, mirrored at all y)
                let a = self.a();
                self.set_f(sub_flags(0, a, 0));
                self.set_a(0u8.wrapping_sub(a));
                8
            }
            5 => {
                // RETN / RETI (identical here; RETN restores IFF1)
                self.reg.pc = self.pop_word(bus);
                self.reg.iff1 = self.reg.iff2;
                14
            }
            6 => {
                // IM 0/1/2, with undocumented mirrors
                self.reg.im = match y {
                    2 | 6 => 1,
                    3 | 7 => 2,
                    _ => 0,
                };
                8
            }
            _ => match y {
                0 => {
                    // LD I,A
                    self.reg.i = self.a();
                    9
                }
                1 => {
                    // LD R,A
                    self.reg.r = self.a();
                    9
                }
                2 => {
                    let i = self.reg.i;
                    self.ld_a_ir(i)
                }
                3 => {
                    let r = self.reg.r;
                    self.ld_a_ir(r)
                }
                4 => {
                    // RRD: low nibble of (HL) into A, A's low nibble into
                    // the high nibble of (HL)
                    let a = self.a();
                    let addr = self.reg.hl;
                    let val = self.read_bus(bus, addr);
                    let new_val = a << 4 | val >> 4;
                    let new_a = a & 0xF0 | val & 0x0F;
                    self.write_bus(bus, addr, new_val);
                    self.set_a(new_a);
                    let f = sz_flags(new_a) | PARITY[new_a as usize] | self.f() & flags::C;
                    self.set_f(f);
                    18
                }
                5 => {
                    // RLD: high nibble of (HL) into A, A's low nibble into
                    // the low nibble of (HL)
                    let a = self.a();
                    let addr = self.reg.hl;
                    let val = self.read_bus(bus, addr);
                    let new_val = val << 4 | a & 0x0F;
                    let new_a = a & 0xF0 | val >> 4;
                    self.write_bus(bus, addr, new_val);
                    self.set_a(new_a);
                    let f = sz_flags(new_a) | PARITY[new_a as usize] | self.f() & flags::C;
                    self.set_f(f);
                    18
                }
                _ => 8,
            },
        }
    }

    /// LD A,I and LD A,R: PV is loaded from IFF2.
    fn ld_a_ir(&mut self, val: u8) -> u32 {
        self.set_a(val);
        let mut f = sz_flags(val) | self.f() & flags::C;
        if self.reg.iff2 {
            f |= flags::PV;
        }
        self.set_f(f);
        9
    }

    // ========== Block Transfer / Compare / I/O ==========

    /// Execute an ED-prefix block instruction (x=2, y>=4, z<=3).
    /// y: 4=increment, 5=decrement, 6/7=repeating forms.
    /// z: 0=load, 1=compare, 2=input, 3=output.
    fn execute_block(&mut self, bus: &mut impl Bus, y: u8, z: u8) -> u32 {
        let dir: i16 = if y & 1 == 0 { 1 } else { -1 };
        let repeat = y >= 6;
        match z {
            0 => {
                self.block_ld(bus, dir);
                if repeat {
                    self.block_repeat(self.reg.bc != 0)
                } else {
                    16
                }
            }
            1 => {
                self.block_cp(bus, dir);
                if repeat {
                    let again = self.reg.bc != 0 && self.f() & flags::Z == 0;
                    self.block_repeat(again)
                } else {
                    16
                }
            }
            2 => {
                self.block_in(bus, dir);
                if repeat {
                    self.block_io_repeat(self.b() != 0)
                } else {
                    16
                }
            }
            _ => {
                self.block_out(bus, dir);
                if repeat {
                    self.block_io_repeat(self.b() != 0)
                } else {
                    16
                }
            }
        }
    }

    /// One iteration of LDI/LDD/LDIR/LDDR.
    fn block_ld(&mut self, bus: &mut impl Bus, dir: i16) {
        let hl = self.reg.hl;
        let val = self.read_bus(bus, hl);
        let de = self.reg.de;
        self.write_bus(bus, de, val);
        self.reg.hl = self.reg.hl.wrapping_add(dir as u16);
        self.reg.de = self.reg.de.wrapping_add(dir as u16);
        self.reg.bc = self.reg.bc.wrapping_sub(1);
        let n = val.wrapping_add(self.a());
        let mut f = self.f() & (flags::S | flags::Z | flags::C);
        if n & 0x02 != 0 {
            f |= flags::F5;
        }
        f |= n & flags::F3;
        if self.reg.bc != 0 {
            f |= flags::PV;
        }
        self.set_f(f);
    }

    /// One iteration of CPI/CPD/CPIR/CPDR.
    fn block_cp(&mut self, bus: &mut impl Bus, dir: i16) {
        let hl = self.reg.hl;
        let val = self.read_bus(bus, hl);
        let a = self.a();
        let result = a.wrapping_sub(val);
        self.reg.hl = self.reg.hl.wrapping_add(dir as u16);
        self.reg.bc = self.reg.bc.wrapping_sub(1);
        let mut f = sz_flags(result) | flags::N | self.f() & flags::C;
        if (a ^ val ^ result) & 0x10 != 0 {
            f |= flags::H;
        }
        // F3/F5 come from result - H, not the result itself
        f &= !(flags::F3 | flags::F5);
        let n = if f & flags::H != 0 { result.wrapping_sub(1) } else { result };
        if n & 0x02 != 0 {
            f |= flags::F5;
        }
        f |= n & flags::F3;
        if self.reg.bc != 0 {
            f |= flags::PV;
        }
        self.set_f(f);
    }

    /// One iteration of INI/IND/INIR/INDR.
    fn block_in(&mut self, bus: &mut impl Bus, dir: i16) {
        let port = self.reg.bc;
        let val = self.in_bus(bus, port);
        let hl = self.reg.hl;
        self.write_bus(bus, hl, val);
        let b = self.b().wrapping_sub(1);
        self.set_b(b);
        self.reg.hl = self.reg.hl.wrapping_add(dir as u16);
        let mut f = sz_flags(b);
        if val & 0x80 != 0 {
            f |= flags::N;
        }
        let k = u16::from(val) + u16::from(self.c().wrapping_add(dir as u8));
        if k > 0xFF {
            f |= flags::H | flags::C;
        }
        f |= PARITY[(k as u8 & 7 ^ b) as usize];
        self.set_f(f);
    }

    /// One iteration of OUTI/OUTD/OTIR/OTDR. B is decremented before the
    /// port write, so the port address carries the new B.
    fn block_out(&mut self, bus: &mut impl Bus, dir: i16) {
        let hl = self.reg.hl;
        let val = self.read_bus(bus, hl);
        let b = self.b().wrapping_sub(1);
        self.set_b(b);
        let port = self.reg.bc;
        self.out_bus(bus, port, val);
        self.reg.hl = self.reg.hl.wrapping_add(dir as u16);
        let mut f = sz_flags(b);
        if val & 0x80 != 0 {
            f |= flags::N;
        }
        let k = u16::from(val) + u16::from(self.reg.hl as u8);
        if k > 0xFF {
            f |= flags::H | flags::C;
        }
        f |= PARITY[(k as u8 & 7 ^ b) as usize];
        self.set_f(f);
    }

    /// Repeat-or-finish for block load/compare. A rewound iteration leaves
    /// F3/F5 loaded from the high byte of PC+1.
    fn block_repeat(&mut self, repeat: bool) -> u32 {
        if repeat {
            self.reg.pc = self.reg.pc.wrapping_sub(2);
            let wz_hi = (self.reg.pc.wrapping_add(1) >> 8) as u8;
            let f = self.f() & !(flags::F3 | flags::F5) | wz_hi & (flags::F3 | flags::F5);
            self.set_f(f);
            21
        } else {
            16
        }
    }

    /// Repeat-or-finish for block I/O.
    fn block_io_repeat(&mut self, repeat: bool) -> u32 {
        if repeat {
            self.reg.pc = self.reg.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    // ========== DD/FD Prefix (Indexed Instructions) ==========

    /// Execute a DD- or FD-prefixed instruction with the HL slot rebound to
    /// IX or IY. Opcodes without indexed-specific behavior fall through to
    /// the base page with a 4-cycle prefix surcharge.
    fn execute_index(&mut self, bus: &mut impl Bus, which: IndexReg) -> u32 {
        let prev = self.index;
        self.index = which;
        let op = self.fetch_opcode(bus);
        let cost = if op == 0xCB {
            // DD CB d op: displacement comes between the prefix pair and
            // the operation byte, and neither is an M1 fetch.
            self.idx_addr = self.index_addr(bus);
            let op2 = self.fetch_byte(bus);
            4 + self.execute_index_cb(bus, op2)
        } else {
            self.execute_index_main(bus, op)
        };
        self.index = prev;
        cost
    }

    /// Execute the opcodes that change meaning under DD/FD: every (HL)
    /// memory operand becomes (IX+d)/(IY+d) with its own timing, while
    /// register fields 4 and 5 keep meaning the true H and L.
    fn execute_index_main(&mut self, bus: &mut impl Bus, op: u8) -> u32 {
        let y = (op >> 3) & 7;
        let z = op & 7;
        match op {
            0x34 => {
                // INC (IX+d)
                let addr = self.index_addr(bus);
                let val = self.read_bus(bus, addr);
                let f = inc_flags(val) | self.f() & flags::C;
                self.write_bus(bus, addr, val.wrapping_add(1));
                self.set_f(f);
                23
            }
            0x35 => {
                // DEC (IX+d)
                let addr = self.index_addr(bus);
                let val = self.read_bus(bus, addr);
                let f = dec_flags(val) | self.f() & flags::C;
                self.write_bus(bus, addr, val.wrapping_sub(1));
                self.set_f(f);
                23
            }
            0x36 => {
                // LD (IX+d),n
                let addr = self.index_addr(bus);
                let n = self.fetch_byte(bus);
                self.write_bus(bus, addr, n);
                19
            }
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                // LD r,(IX+d)
                let addr = self.index_addr(bus);
                let val = self.read_bus(bus, addr);
                self.set_reg8_direct(y, val);
                19
            }
            0x70..=0x75 | 0x77 => {
                // LD (IX+d),r
                let addr = self.index_addr(bus);
                let val = self.reg8_direct(z);
                self.write_bus(bus, addr, val);
                19
            }
            0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                // ALU A,(IX+d)
                let addr = self.index_addr(bus);
                let val = self.read_bus(bus, addr);
                self.alu_op(y, val);
                19
            }
            // Everything else executes from the base page with the HL slot
            // redirected (LD IX,nn, ADD IX,rp, PUSH IX, IXH/IXL access, ...)
            // at a 4-cycle prefix surcharge.
            _ => 4 + self.execute_main(bus, op),
        }
    }

    /// Execute a DD CB / FD CB operation byte against the precomputed
    /// indexed address.
    fn execute_index_cb(&mut self, bus: &mut impl Bus, op: u8) -> u32 {
        let y = (op >> 3) & 7;
        let z = op & 7;
        let addr = self.idx_addr;
        match op >> 6 {
            0 => {
                // Rotate/shift (IX+d), with the result also copied into a
                // register for non-(HL) destination encodings
                let val = self.read_bus(bus, addr);
                let (result, f) = rot_shift(y, val, self.f());
                self.write_bus(bus, addr, result);
                if z != 6 {
                    self.set_reg8_direct(z, result);
                }
                self.set_f(f);
                19
            }
            1 => {
                // BIT y,(IX+d): F3/F5 from the high byte of the effective
                // address
                let val = self.read_bus(bus, addr);
                let mut f = self.f() & flags::C | flags::H;
                if val & (1 << y) == 0 {
                    f |= flags::Z | flags::PV;
                }
                if y == 7 && val & 0x80 != 0 {
                    f |= flags::S;
                }
                f |= (addr >> 8) as u8 & (flags::F3 | flags::F5);
                self.set_f(f);
                16
            }
            2 => {
                // RES y,(IX+d)
                let val = self.read_bus(bus, addr) & !(1 << y);
                self.write_bus(bus, addr, val);
                if z != 6 {
                    self.set_reg8_direct(z, val);
                }
                19
            }
            _ => {
                // SET y,(IX+d)
                let val = self.read_bus(bus, addr) | 1 << y;
                self.write_bus(bus, addr, val);
                if z != 6 {
                    self.set_reg8_direct(z, val);
                }
                19
            }
        }
    }
}
