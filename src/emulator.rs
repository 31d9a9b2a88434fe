//! The emulator core.
//!
//! Executes a loaded hex image: fetch, decode ([`crate::encoder::decode`]),
//! execute, then one interrupt-arbitration pass per cycle. Memory is a
//! sparse byte map (unmapped reads are zero) with a memory-mapped register
//! window at the top of the address space. The terminal and the timer run
//! as separate threads; all cross-thread state is atomic flags and words
//! with acquire/release ordering.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::Acquire;
use std::sync::atomic::Ordering::Release;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitflags::bitflags;

use crate::encoder;
use crate::encoder::Decoded;
use crate::Error;

/// Initial program counter.
pub const START_ADDRESS: u32 = 0x4000_0000;

const PC: usize = 15;
const SP: usize = 14;
const STATUS: usize = 0;
const HANDLER: usize = 1;
const CAUSE: usize = 2;

const MMIO_BASE: u32 = 0xFFFF_FF00;
const TERM_OUT_ADDR: u32 = 0xFFFF_FF00;
const TERM_IN_ADDR: u32 = 0xFFFF_FF04;
const TIM_CFG_ADDR: u32 = 0xFFFF_FF10;

bitflags! {
    /// STATUS register interrupt masks.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Status: u32 {
        /// Masks the timer interrupt.
        const TIMER_MASK = 0x1;
        /// Masks the terminal interrupt.
        const TERMINAL_MASK = 0x2;
        /// Masks all hardware interrupts.
        const GLOBAL_MASK = 0x4;
    }
}

/// The period in milliseconds selected by a `tim_cfg` value.
pub fn timer_period(cfg: u32) -> u64 {
    match cfg {
        0x0 => 500,
        0x1 => 1000,
        0x2 => 1500,
        0x3 => 2000,
        0x4 => 5000,
        0x5 => 10000,
        0x6 => 30000,
        0x7 => 60000,
        // Unrecognised settings fall back to the shortest period.
        _ => 500,
    }
}

/// State shared with the timer and terminal threads. Each word has a
/// single writer per direction; the flags gate the hand-offs.
struct Shared {
    running: AtomicBool,
    timer_start: AtomicBool,
    timer_interrupt: AtomicBool,
    terminal_interrupt: AtomicBool,
    /// One-slot rendezvous: raised by the executor with a character in
    /// `term_out`, lowered by the terminal once printed.
    terminal_signal: AtomicBool,
    term_in: AtomicU32,
    term_out: AtomicU32,
    tim_cfg: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            timer_start: AtomicBool::new(false),
            timer_interrupt: AtomicBool::new(false),
            terminal_interrupt: AtomicBool::new(false),
            terminal_signal: AtomicBool::new(false),
            term_in: AtomicU32::new(0),
            term_out: AtomicU32::new(0),
            tim_cfg: AtomicU32::new(0),
        }
    }
}

/// Executes hex images.
pub struct Emulator {
    gpr: [u32; 16],
    csr: [u32; 3],
    memory: BTreeMap<u32, u8>,
    pending_illegal: bool,
    pending_software: bool,
    shared: Arc<Shared>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            gpr: [0; 16],
            csr: [0; 3],
            memory: BTreeMap::new(),
            pending_illegal: false,
            pending_software: false,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Install a loaded image as the initial memory contents.
    pub fn load_image(&mut self, memory: BTreeMap<u32, u8>) {
        self.memory = memory;
    }

    pub fn reg(&self, index: usize) -> u32 {
        self.gpr[index]
    }

    /// Write a general-purpose register; `r0` stays zero.
    pub fn set_reg(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.gpr[index] = value;
        }
    }

    pub fn csr(&self, index: usize) -> u32 {
        self.csr[index]
    }

    /// The register file, formatted four registers per line.
    pub fn register_dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (index, value) in self.gpr.iter().enumerate() {
            let name = format!("r{index}");
            let _ = write!(&mut out, "{name:>3}=0x{value:08x}  ");
            if index % 4 == 3 {
                out.push('\n');
            }
        }
        out
    }

    /// Run from [`START_ADDRESS`] with the timer and terminal attached,
    /// until `halt` or a fatal memory error.
    pub fn run(&mut self) -> Result<(), Error> {
        self.set_reg(PC, START_ADDRESS);
        self.shared.running.store(true, Release);
        let timer = {
            let shared = self.shared.clone();
            thread::spawn(move || timer_thread(shared))
        };
        let terminal = {
            let shared = self.shared.clone();
            thread::spawn(move || terminal_thread(shared))
        };
        let result = loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(error) => break Err(error),
            }
        };
        self.shared.running.store(false, Release);
        let _ = timer.join();
        let _ = terminal.join();
        result
    }

    /// One cycle: fetch, execute, arbitrate interrupts. Returns
    /// `Ok(false)` once `halt` has executed.
    pub fn step(&mut self) -> Result<bool, Error> {
        let word = self.read_word(self.gpr[PC])?;
        self.set_reg(PC, self.gpr[PC].wrapping_add(4));
        let halted = self.execute(encoder::decode(word))?;
        self.arbitrate_interrupts()?;
        Ok(!halted)
    }

    fn illegal(&mut self) -> Result<bool, Error> {
        self.pending_illegal = true;
        Ok(false)
    }

    fn execute(&mut self, instruction: Decoded) -> Result<bool, Error> {
        let Decoded {
            opcode,
            modifier,
            a,
            b,
            c,
            disp,
        } = instruction;
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let disp = disp as u32;
        match opcode {
            // halt
            0x0 => {
                if modifier != 0 || a != 0 || b != 0 || c != 0 || disp != 0 {
                    return self.illegal();
                }
                Ok(true)
            }
            // software interrupt
            0x1 => {
                if modifier != 0 || a != 0 || b != 0 || c != 0 || disp != 0 {
                    return self.illegal();
                }
                self.pending_software = true;
                Ok(false)
            }
            // call
            0x2 => {
                if c != 0 {
                    return self.illegal();
                }
                let target = self.gpr[a].wrapping_add(self.gpr[b]).wrapping_add(disp);
                match modifier {
                    0x0 => {
                        self.push(self.gpr[PC])?;
                        self.set_reg(PC, target);
                    }
                    0x1 => {
                        self.push(self.gpr[PC])?;
                        let target = self.read_word(target)?;
                        self.set_reg(PC, target);
                    }
                    _ => return self.illegal(),
                }
                Ok(false)
            }
            // jump family; modifiers 8..11 dereference through memory
            0x3 => {
                let taken = match modifier & 0x7 {
                    0x0 => true,
                    0x1 => self.gpr[b] == self.gpr[c],
                    0x2 => self.gpr[b] != self.gpr[c],
                    0x3 => (self.gpr[b] as i32) > (self.gpr[c] as i32),
                    _ => return self.illegal(),
                };
                if taken {
                    let target = self.gpr[a].wrapping_add(disp);
                    let target = if modifier & 0x8 != 0 {
                        self.read_word(target)?
                    } else {
                        target
                    };
                    self.set_reg(PC, target);
                }
                Ok(false)
            }
            // xchg
            0x4 => {
                if modifier != 0 || a != 0 || disp != 0 {
                    return self.illegal();
                }
                let temp = self.gpr[b];
                self.set_reg(b, self.gpr[c]);
                self.set_reg(c, temp);
                Ok(false)
            }
            // arithmetic
            0x5 => {
                if disp != 0 {
                    return self.illegal();
                }
                let value = match modifier {
                    0x0 => self.gpr[b].wrapping_add(self.gpr[c]),
                    0x1 => self.gpr[b].wrapping_sub(self.gpr[c]),
                    0x2 => self.gpr[b].wrapping_mul(self.gpr[c]),
                    0x3 => {
                        if self.gpr[c] == 0 {
                            return self.illegal();
                        }
                        (self.gpr[b] as i32).wrapping_div(self.gpr[c] as i32) as u32
                    }
                    _ => return self.illegal(),
                };
                self.set_reg(a, value);
                Ok(false)
            }
            // logic
            0x6 => {
                if disp != 0 {
                    return self.illegal();
                }
                let value = match modifier {
                    0x0 => !self.gpr[b],
                    0x1 => self.gpr[b] & self.gpr[c],
                    0x2 => self.gpr[b] | self.gpr[c],
                    0x3 => self.gpr[b] ^ self.gpr[c],
                    _ => return self.illegal(),
                };
                self.set_reg(a, value);
                Ok(false)
            }
            // shift; right shifts are arithmetic
            0x7 => {
                if disp != 0 {
                    return self.illegal();
                }
                let value = match modifier {
                    0x0 => self.gpr[b].wrapping_shl(self.gpr[c]),
                    0x1 => (self.gpr[b] as i32).wrapping_shr(self.gpr[c]) as u32,
                    _ => return self.illegal(),
                };
                self.set_reg(a, value);
                Ok(false)
            }
            // store
            0x8 => {
                match modifier {
                    0x0 => {
                        let address = self.gpr[a].wrapping_add(self.gpr[b]).wrapping_add(disp);
                        self.write_word(address, self.gpr[c])?;
                    }
                    0x1 => {
                        // pre-modify the base register, then store through it
                        self.set_reg(a, self.gpr[a].wrapping_add(disp));
                        self.write_word(self.gpr[a], self.gpr[c])?;
                    }
                    0x2 => {
                        let pointer = self.gpr[a].wrapping_add(self.gpr[b]).wrapping_add(disp);
                        let address = self.read_word(pointer)?;
                        self.write_word(address, self.gpr[c])?;
                    }
                    _ => return self.illegal(),
                }
                Ok(false)
            }
            // load (GPR and CSR transfers)
            0x9 => {
                match modifier {
                    0x0 => {
                        if b > 2 {
                            return self.illegal();
                        }
                        self.set_reg(a, self.csr[b]);
                    }
                    0x1 => self.set_reg(a, self.gpr[b].wrapping_add(disp)),
                    0x2 => {
                        let address =
                            self.gpr[b].wrapping_add(self.gpr[c]).wrapping_add(disp);
                        let value = self.read_word(address)?;
                        self.set_reg(a, value);
                    }
                    0x3 => {
                        let value = self.read_word(self.gpr[b])?;
                        self.set_reg(a, value);
                        self.set_reg(b, self.gpr[b].wrapping_add(disp));
                    }
                    0x4 => {
                        if a > 2 {
                            return self.illegal();
                        }
                        self.csr[a] = self.gpr[b];
                    }
                    0x5 => {
                        if a > 2 || b > 2 {
                            return self.illegal();
                        }
                        self.csr[a] = self.csr[b] | disp;
                    }
                    0x6 => {
                        if a > 2 {
                            return self.illegal();
                        }
                        let address =
                            self.gpr[b].wrapping_add(self.gpr[c]).wrapping_add(disp);
                        self.csr[a] = self.read_word(address)?;
                    }
                    0x7 => {
                        if a > 2 {
                            return self.illegal();
                        }
                        self.csr[a] = self.read_word(self.gpr[b])?;
                        self.set_reg(b, self.gpr[b].wrapping_add(disp));
                    }
                    _ => return self.illegal(),
                }
                Ok(false)
            }
            _ => self.illegal(),
        }
    }

    fn push(&mut self, value: u32) -> Result<(), Error> {
        self.set_reg(SP, self.gpr[SP].wrapping_sub(4));
        self.write_word(self.gpr[SP], value)
    }

    fn enter_interrupt(&mut self, cause: u32) -> Result<(), Error> {
        self.push(self.csr[STATUS])?;
        self.push(self.gpr[PC])?;
        self.csr[CAUSE] = cause;
        self.set_reg(PC, self.csr[HANDLER]);
        Ok(())
    }

    /// Priority: illegal instruction, software interrupt, timer,
    /// terminal. Hardware interrupts honour the STATUS masks and stay
    /// pending while masked.
    fn arbitrate_interrupts(&mut self) -> Result<(), Error> {
        let status = Status::from_bits_retain(self.csr[STATUS]);
        if self.pending_illegal {
            self.enter_interrupt(1)?;
            self.csr[STATUS] |= Status::GLOBAL_MASK.bits();
            self.pending_illegal = false;
        } else if self.pending_software {
            self.enter_interrupt(4)?;
            self.csr[STATUS] &= !Status::TIMER_MASK.bits();
            self.pending_software = false;
        } else if !status.contains(Status::GLOBAL_MASK) {
            if self.shared.timer_interrupt.load(Acquire)
                && !status.contains(Status::TIMER_MASK)
            {
                self.enter_interrupt(2)?;
                self.csr[STATUS] |= Status::GLOBAL_MASK.bits();
                self.shared.timer_interrupt.store(false, Release);
            } else if self.shared.terminal_interrupt.load(Acquire)
                && !status.contains(Status::TERMINAL_MASK)
            {
                self.enter_interrupt(3)?;
                self.csr[STATUS] |= Status::GLOBAL_MASK.bits();
                self.shared.terminal_interrupt.store(false, Release);
            }
        }
        Ok(())
    }

    fn read_byte(&self, address: u32) -> Result<u8, Error> {
        if address >= MMIO_BASE {
            return Err(Error::InvalidMmioAccess(address));
        }
        Ok(self.memory.get(&address).copied().unwrap_or(0))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), Error> {
        if address >= MMIO_BASE {
            return Err(Error::InvalidMmioAccess(address));
        }
        self.memory.insert(address, value);
        Ok(())
    }

    fn read_word(&self, address: u32) -> Result<u32, Error> {
        if address > u32::MAX - 3 {
            return Err(Error::MemoryBoundary(address));
        }
        if address >= MMIO_BASE {
            return match address {
                TERM_IN_ADDR => Ok(self.shared.term_in.load(Acquire)),
                TIM_CFG_ADDR => Ok(self.shared.tim_cfg.load(Acquire)),
                _ => Err(Error::InvalidMmioAccess(address)),
            };
        }
        let mut value = 0_u32;
        for index in 0..4 {
            value |= (self.read_byte(address + index)? as u32) << (8 * index);
        }
        Ok(value)
    }

    fn write_word(&mut self, address: u32, value: u32) -> Result<(), Error> {
        if address > u32::MAX - 3 {
            return Err(Error::MemoryBoundary(address));
        }
        if address >= MMIO_BASE {
            return match address {
                TERM_OUT_ADDR => {
                    self.write_terminal(value);
                    Ok(())
                }
                TIM_CFG_ADDR => {
                    self.shared.tim_cfg.store(value, Release);
                    self.shared.timer_start.store(true, Release);
                    Ok(())
                }
                _ => Err(Error::InvalidMmioAccess(address)),
            };
        }
        for (index, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte(address + index as u32, byte)?;
        }
        Ok(())
    }

    /// Hand one character to the terminal thread and wait for it to be
    /// printed; at most one character is ever in flight. Without an
    /// attached terminal thread the character goes straight to stdout.
    fn write_terminal(&self, value: u32) {
        if !self.shared.running.load(Acquire) {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&[(value & 0xFF) as u8]);
            let _ = stdout.flush();
            return;
        }
        while self.shared.terminal_signal.load(Acquire) {
            thread::yield_now();
        }
        self.shared.term_out.store(value, Release);
        self.shared.terminal_signal.store(true, Release);
        while self.shared.terminal_signal.load(Acquire) {
            thread::yield_now();
        }
    }
}

fn timer_thread(shared: Arc<Shared>) {
    while !shared.timer_start.load(Acquire) {
        if !shared.running.load(Acquire) {
            return;
        }
        thread::yield_now();
    }
    while shared.running.load(Acquire) {
        // Sleep in slices so a halt does not leave the thread parked for
        // a full period.
        let mut remaining = timer_period(shared.tim_cfg.load(Acquire));
        while remaining > 0 && shared.running.load(Acquire) {
            let slice = remaining.min(50);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
        if shared.running.load(Acquire) {
            shared.timer_interrupt.store(true, Release);
        }
    }
}

/// Puts stdin into non-canonical non-blocking mode for the thread's
/// lifetime; the original attributes come back on every exit path,
/// including unwinding.
///
/// The non-blocking flag is set even when stdin is not a terminal
/// (redirected input), otherwise the poll loop would park in `read` and
/// never observe shutdown.
struct RawMode {
    old_termios: Option<libc::termios>,
    old_flags: libc::c_int,
}

impl RawMode {
    fn enable() -> Self {
        // SAFETY: tcgetattr/tcsetattr/fcntl are called on STDIN with a
        // locally owned termios struct; when tcgetattr fails (stdin is
        // not a tty) no terminal attributes are changed.
        unsafe {
            let old_flags = libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL, 0);
            libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, old_flags | libc::O_NONBLOCK);
            let mut old_termios: libc::termios = std::mem::zeroed();
            let old_termios = if libc::tcgetattr(libc::STDIN_FILENO, &mut old_termios) == 0 {
                let mut raw = old_termios;
                raw.c_lflag &= !(libc::ICANON | libc::ECHO);
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw);
                Some(old_termios)
            } else {
                None
            };
            Self {
                old_termios,
                old_flags,
            }
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        // SAFETY: restores the attributes captured in enable().
        unsafe {
            if let Some(old_termios) = &self.old_termios {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, old_termios);
            }
            libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, self.old_flags);
        }
    }
}

fn terminal_thread(shared: Arc<Shared>) {
    let _raw = RawMode::enable();
    while shared.running.load(Acquire) {
        let mut byte = 0_u8;
        // SAFETY: reads at most one byte into a valid one-byte buffer;
        // stdin is non-blocking, so the call never parks the thread.
        let count = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                &mut byte as *mut u8 as *mut libc::c_void,
                1,
            )
        };
        if count == 1 {
            shared.term_in.store(byte as u32, Release);
            shared.terminal_interrupt.store(true, Release);
        }
        if shared.terminal_signal.load(Acquire) {
            let value = shared.term_out.load(Acquire);
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&[(value & 0xFF) as u8]);
            let _ = stdout.flush();
            shared.terminal_signal.store(false, Release);
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot(programs: &[&[u8]]) -> Emulator {
        let mut memory = BTreeMap::new();
        let mut address = START_ADDRESS;
        for program in programs {
            for byte in *program {
                memory.insert(address, *byte);
                address += 1;
            }
        }
        let mut emulator = Emulator::new();
        emulator.load_image(memory);
        emulator.set_reg(PC, START_ADDRESS);
        emulator
    }

    fn run_to_halt(emulator: &mut Emulator) {
        for _ in 0..1000 {
            if !emulator.step().expect("step") {
                return;
            }
        }
        panic!("program did not halt");
    }

    #[test]
    fn halt_with_immediate_load() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(1, 42).expect("ld"),
            &encoder::halt().expect("halt"),
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(42, emulator.reg(1));
        assert!(emulator.register_dump().contains("r1=0x0000002a"));
    }

    #[test]
    fn arithmetic_and_r0_guard() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(1, 6).expect("ld"),
            &encoder::ld_immediate(2, 7).expect("ld"),
            &encoder::mul(1, 2).expect("mul"),
            &encoder::ld_immediate(0, 99).expect("ld"),
            &encoder::halt().expect("halt"),
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(42, emulator.reg(2));
        assert_eq!(0, emulator.reg(0));
    }

    #[test]
    fn signed_division_and_shift() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(1, -12).expect("ld"),
            &encoder::ld_immediate(2, 4).expect("ld"),
            &encoder::ld_immediate(3, -16).expect("ld"),
            &encoder::ld_immediate(4, 2).expect("ld"),
            // r1 <- r1 / r2, r3 <- r3 >> r4 (arithmetic)
            &encoder::div(2, 1).expect("div"),
            &encoder::shr(4, 3).expect("shr"),
            &encoder::halt().expect("halt"),
        ]);
        run_to_halt(&mut emulator);
        assert_eq!((-3_i32) as u32, emulator.reg(1));
        assert_eq!((-4_i32) as u32, emulator.reg(3));
    }

    #[test]
    fn store_and_load_round_trip_memory() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(1, 0x11223344).expect("ld"),
            &encoder::ld_immediate(2, 0x1000).expect("ld"),
            &encoder::st_register_indirect(1, 2).expect("st"),
            &encoder::ld_register_indirect(3, 2).expect("ld"),
            &encoder::halt().expect("halt"),
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(0x11223344, emulator.reg(3));
        assert_eq!(Some(&0x44), emulator.memory.get(&0x1000));
        assert_eq!(Some(&0x11), emulator.memory.get(&0x1003));
    }

    #[test]
    fn software_interrupt_enters_handler() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x1000).expect("ld"),
            &encoder::int().expect("int"),
            // handler is at address 0: the zeroed word there is `halt`.
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(4, emulator.csr(CAUSE));
        assert_eq!(0x1000 - 8, emulator.reg(SP));
        // Pushed return address sits at the new stack top.
        let pushed = emulator.read_word(emulator.reg(SP)).expect("read");
        assert_eq!(START_ADDRESS + 12, pushed);
    }

    #[test]
    fn interrupt_handler_returns_via_iret() {
        let handler = START_ADDRESS + 28;
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x2000).expect("ld"), // 0
            &encoder::ld_immediate(1, handler as i32).expect("ld"), // 8
            &encoder::csrwr(1, HANDLER as u8).expect("csrwr"), // 16
            &encoder::int().expect("int"),                   // 20
            &encoder::halt().expect("halt"),                 // 24
            &encoder::iret().expect("iret"),                 // 28
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(4, emulator.csr(CAUSE));
        assert_eq!(0x2000, emulator.reg(SP));
    }

    #[test]
    fn illegal_opcode_raises_cause_1() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x1000).expect("ld"),
            &[0xF0, 0, 0, 0],
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(1, emulator.csr(CAUSE));
        assert_eq!(
            Status::GLOBAL_MASK.bits(),
            emulator.csr(STATUS) & Status::GLOBAL_MASK.bits()
        );
    }

    #[test]
    fn division_by_zero_is_an_illegal_instruction() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x1000).expect("ld"),
            &encoder::ld_immediate(2, 5).expect("ld"),
            // r2 <- r2 / r1 with r1 still zero.
            &encoder::div(1, 2).expect("div"),
        ]);
        run_to_halt(&mut emulator);
        assert_eq!(1, emulator.csr(CAUSE));
        // The destination register was left untouched.
        assert_eq!(5, emulator.reg(2));
    }

    #[test]
    fn masked_interrupts_stay_pending() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x1000).expect("ld"),
            &encoder::halt().expect("halt"),
        ]);
        emulator.csr[STATUS] = Status::GLOBAL_MASK.bits();
        emulator.shared.timer_interrupt.store(true, Release);
        emulator.step().expect("step");
        assert!(emulator.shared.timer_interrupt.load(Acquire));
        assert_ne!(2, emulator.csr(CAUSE));

        emulator.csr[STATUS] = 0;
        emulator.step().expect("step");
        assert!(!emulator.shared.timer_interrupt.load(Acquire));
        assert_eq!(2, emulator.csr(CAUSE));
    }

    #[test]
    fn timer_mask_bit_blocks_only_the_timer() {
        let mut emulator = boot(&[
            &encoder::ld_immediate(14, 0x1000).expect("ld"),
            &encoder::halt().expect("halt"),
        ]);
        emulator.csr[STATUS] = Status::TIMER_MASK.bits();
        emulator.shared.timer_interrupt.store(true, Release);
        emulator.shared.terminal_interrupt.store(true, Release);
        emulator.step().expect("step");
        // The terminal wins because the timer is masked.
        assert_eq!(3, emulator.csr(CAUSE));
        assert!(emulator.shared.timer_interrupt.load(Acquire));
    }

    #[test]
    fn unmapped_memory_reads_zero() {
        let emulator = Emulator::new();
        assert_eq!(0, emulator.read_word(0x1234).expect("read"));
    }

    #[test]
    fn mmio_rules() {
        let mut emulator = Emulator::new();
        // A word read straddling the window start touches mapped bytes.
        assert!(matches!(
            emulator.read_word(0xFFFF_FEFE),
            Err(Error::InvalidMmioAccess(_))
        ));
        assert!(matches!(
            emulator.read_word(0xFFFF_FFFD),
            Err(Error::MemoryBoundary(_))
        ));
        assert!(matches!(
            emulator.read_word(0xFFFF_FF08),
            Err(Error::InvalidMmioAccess(_))
        ));
        assert!(matches!(
            emulator.write_word(0xFFFF_FF04, 1),
            Err(Error::InvalidMmioAccess(_))
        ));
        assert_eq!(0, emulator.read_word(TERM_IN_ADDR).expect("term_in"));
        emulator.write_word(TIM_CFG_ADDR, 3).expect("tim_cfg");
        assert_eq!(3, emulator.read_word(TIM_CFG_ADDR).expect("tim_cfg"));
        assert!(emulator.shared.timer_start.load(Acquire));
    }

    #[test]
    fn timer_periods() {
        assert_eq!(500, timer_period(0));
        assert_eq!(1000, timer_period(1));
        assert_eq!(1500, timer_period(2));
        assert_eq!(2000, timer_period(3));
        assert_eq!(5000, timer_period(4));
        assert_eq!(10000, timer_period(5));
        assert_eq!(30000, timer_period(6));
        assert_eq!(60000, timer_period(7));
        assert_eq!(500, timer_period(0xDEAD));
    }
}
