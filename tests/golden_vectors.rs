//! Golden-vector runner: sets up the CPU to match a given state, runs a
//! single instruction, and compares against the expected state.
//!
//! The vectors are the externally authored per-opcode JSON files from the
//! SingleStepTests project (z80 set, ~1000 cases per opcode). Point
//! `Z80_SST_PATH` at a directory of those files to run them; without the
//! variable the test passes trivially so the suite stays self-contained.
//! `Z80_SST_STRICT=1` also runs the files on the known-failure list.

use std::collections::HashMap;
use std::{env, fs};

use serde::Deserialize;
use serde_with::{serde_as, BoolFromInt};

use z80_core::{Bus, Cpu, Registers};

/// Files that fail because of unmodeled processor internals. The WZ
/// (MEMPTR) register drives F3/F5 in BIT n,(HL) and the repeating block
/// I/O forms, and SCF/CCF mix in the q register. Entries come off this
/// list as those details are implemented.
fn known_failures() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("37.json", "SCF q-register F3/F5"),
        ("3f.json", "CCF q-register F3/F5"),
        ("dd 37.json", "SCF q-register F3/F5 (DD prefix)"),
        ("dd 3f.json", "CCF q-register F3/F5 (DD prefix)"),
        ("fd 37.json", "SCF q-register F3/F5 (FD prefix)"),
        ("fd 3f.json", "CCF q-register F3/F5 (FD prefix)"),
        ("cb 46.json", "BIT 0,(HL) WZ F3/F5"),
        ("cb 4e.json", "BIT 1,(HL) WZ F3/F5"),
        ("cb 56.json", "BIT 2,(HL) WZ F3/F5"),
        ("cb 5e.json", "BIT 3,(HL) WZ F3/F5"),
        ("cb 66.json", "BIT 4,(HL) WZ F3/F5"),
        ("cb 6e.json", "BIT 5,(HL) WZ F3/F5"),
        ("cb 76.json", "BIT 6,(HL) WZ F3/F5"),
        ("cb 7e.json", "BIT 7,(HL) WZ F3/F5"),
        ("ed b1.json", "CPIR WZ-dependent flags"),
        ("ed b2.json", "INIR WZ-dependent flags"),
        ("ed b3.json", "OTIR WZ-dependent flags"),
        ("ed ba.json", "INDR WZ-dependent flags"),
        ("ed bb.json", "OTDR WZ-dependent flags"),
    ])
}

/// CPU state as represented in the vector files. Registers are split into
/// individual bytes; `ram` lists `[addr, value]` pairs.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
struct State {
    pc: u16,
    sp: u16,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    f: u8,
    h: u8,
    l: u8,
    i: u8,
    r: u8,
    ix: u16,
    iy: u16,
    af_: u16,
    bc_: u16,
    de_: u16,
    hl_: u16,
    im: u8,
    #[serde_as(as = "BoolFromInt")]
    iff1: bool,
    #[serde_as(as = "BoolFromInt")]
    iff2: bool,
    ram: Vec<(u16, u8)>,
}

impl State {
    fn registers(&self) -> Registers {
        Registers {
            af: u16::from(self.a) << 8 | u16::from(self.f),
            bc: u16::from(self.b) << 8 | u16::from(self.c),
            de: u16::from(self.d) << 8 | u16::from(self.e),
            hl: u16::from(self.h) << 8 | u16::from(self.l),
            af_prime: self.af_,
            bc_prime: self.bc_,
            de_prime: self.de_,
            hl_prime: self.hl_,
            ix: self.ix,
            iy: self.iy,
            sp: self.sp,
            pc: self.pc,
            i: self.i,
            r: self.r,
            iff1: self.iff1,
            iff2: self.iff2,
            im: self.im,
            halted: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct Case {
    name: String,
    initial: State,
    #[serde(rename = "final")]
    final_state: State,
    /// One entry per machine cycle; only the length is checked.
    cycles: Vec<serde_json::Value>,
    /// `[port, value, "r"/"w"]` triples.
    #[serde(default)]
    ports: Vec<(u16, u8, String)>,
}

struct VectorBus {
    mem: Vec<u8>,
    port_in: HashMap<u16, u8>,
}

impl Bus for VectorBus {
    fn fetch(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }
    fn read(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }
    fn write(&mut self, addr: u16, val: u8) {
        self.mem[addr as usize] = val;
    }
    fn input(&mut self, port: u16) -> u8 {
        self.port_in.get(&port).copied().unwrap_or(0xFF)
    }
    fn output(&mut self, _port: u16, _val: u8) {}
}

/// Run one vector; returns a description of the first mismatch, if any.
fn run_case(case: &Case) -> Option<String> {
    let mut bus = VectorBus {
        mem: vec![0; 0x10000],
        port_in: HashMap::new(),
    };
    for &(addr, val) in &case.initial.ram {
        bus.mem[addr as usize] = val;
    }
    for (port, val, dir) in &case.ports {
        if dir == "r" {
            bus.port_in.insert(*port, *val);
        }
    }

    let mut cpu = Cpu::new();
    cpu.set_registers(case.initial.registers());

    let cycles = cpu.step(&mut bus);

    let want = case.final_state.registers();
    let got = cpu.registers();
    // The vectors never leave the CPU halted mid-case.
    let got = Registers {
        halted: false,
        ..got
    };
    if got != want {
        return Some(format!(
            "{}: registers\n  want {want:04x?}\n  got  {got:04x?}",
            case.name
        ));
    }
    for &(addr, val) in &case.final_state.ram {
        if bus.mem[addr as usize] != val {
            return Some(format!(
                "{}: ram[{addr:#06x}] = {:#04x}, want {val:#04x}",
                case.name, bus.mem[addr as usize]
            ));
        }
    }
    if cycles as usize != case.cycles.len() {
        return Some(format!(
            "{}: cycles = {cycles}, want {}",
            case.name,
            case.cycles.len()
        ));
    }
    None
}

#[test]
fn golden_vectors() {
    let Some(dir) = env::var_os("Z80_SST_PATH") else {
        eprintln!("golden_vectors: Z80_SST_PATH not set, nothing to run");
        return;
    };
    let strict = env::var_os("Z80_SST_STRICT").is_some();
    let skip = known_failures();

    let mut files: Vec<_> = fs::read_dir(&dir)
        .expect("reading Z80_SST_PATH")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    assert!(!files.is_empty(), "no .json vectors in Z80_SST_PATH");

    let mut failures = Vec::new();
    let mut ran = 0usize;
    for path in files {
        let fname = path.file_name().unwrap().to_string_lossy().into_owned();
        if let Some(reason) = skip.get(fname.as_str()) {
            if !strict {
                eprintln!("skipping {fname}: {reason} (Z80_SST_STRICT=1 to run)");
                continue;
            }
        }
        let data = fs::read(&path).unwrap_or_else(|e| panic!("reading {fname}: {e}"));
        let cases: Vec<Case> =
            serde_json::from_slice(&data).unwrap_or_else(|e| panic!("parsing {fname}: {e}"));
        for case in &cases {
            ran += 1;
            if let Some(msg) = run_case(case) {
                failures.push(format!("{fname}: {msg}"));
            }
        }
    }

    eprintln!("golden_vectors: {ran} cases, {} failures", failures.len());
    assert!(
        failures.is_empty(),
        "{} of {ran} golden cases failed; first 20:\n{}",
        failures.len(),
        failures
            .iter()
            .take(20)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    );
}
