use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use crate::cpu::{Cpu, FetchFault, IoQueue};
use crate::instruction::Instruction;
use crate::loader::{self, LoaderError};
use crate::memory::Memory;
use crate::registers::{Flags, Mode, reg};

/// Reset values for the stack pointers of each mode.
const RESET_SP: u32 = 0x7000;
const RESET_SP_IRQ: u32 = 0x7100;
const RESET_SP_SVC: u32 = 0x7200;

/// Words shown in the status stack window, starting at SP.
const STACK_WINDOW_WORDS: u32 = 8;

/// Instructions shown in the status disassembly window.
const DISASSEMBLY_WINDOW: u32 = 8;

/// Cooperative cancellation for [`Computer::run`]. The token is checked
/// once per step boundary, never mid-instruction: an instruction that has
/// started always completes before cancellation is observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

/// Why [`Computer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program halted itself: a zero instruction word or a software
    /// interrupt.
    Halted,
    /// The cancellation token was observed at a step boundary.
    Cancelled,
}

/// A fatal failure inside a step. Unlike the recoverable faults an
/// executing instruction can hit, a failed fetch leaves the machine with
/// no usable program counter, so the run loop stops here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepFault {
    /// Number of the step that could not start.
    pub step: u64,
    pub fault: FetchFault,
}

impl fmt::Display for StepFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} aborted: {}", self.step, self.fault)
    }
}

impl std::error::Error for StepFault {}

/// Destination for trace lines. Injected by the host; the core keeps no
/// global logging state.
pub type TraceSink = Box<dyn Write + Send>;

/// Read-only snapshot of the machine, shaped for a presentation layer.
/// Registers, stack and memory are pre-formatted display strings.
#[derive(Debug, Clone, Serialize)]
pub struct ComputerStatus {
    pub flags: Flags,
    pub mode: String,
    /// r0-r15 as 8-digit hex. r15 is the raw PC, without the pipelining
    /// adjustment, so a viewer can line it up with the disassembly.
    pub registers: Vec<String>,
    /// `address: value` lines for the words at and above SP.
    pub stack: Vec<String>,
    /// `address  word  text` lines around PC.
    pub disassembly: Vec<String>,
    /// Full memory dump, 16 bytes per line.
    pub memory: Vec<String>,
    pub steps: u64,
    pub checksum: i32,
}

/// The whole machine: CPU (with its RAM and register file), step counter
/// and trace sink. Drives the fetch-decode-execute loop.
pub struct Computer {
    cpu: Cpu,
    steps: u64,
    trace_sink: Option<TraceSink>,
}

impl Computer {
    /// Builds a machine with `memory_size` bytes of RAM, reset and ready
    /// to load a program.
    #[must_use]
    pub fn new(memory_size: u32) -> Self {
        let mut computer = Self {
            cpu: Cpu::new(Memory::new(memory_size)),
            steps: 0,
            trace_sink: None,
        };
        computer.reset();
        computer
    }

    /// Zeroes RAM and registers, re-seeds the per-mode stack pointers and
    /// the CPSR mode, and restarts the step numbering at 1.
    pub fn reset(&mut self) {
        self.cpu.ram_mut().zero();

        let registers = self.cpu.registers_mut();
        registers.zero();
        registers.set_mode(Mode::System);
        registers.write_address(reg::R13, RESET_SP);
        registers.write_address(reg::R13_SVC, RESET_SP_SVC);
        registers.write_address(reg::R13_IRQ, RESET_SP_IRQ);

        self.steps = 0;
    }

    /// Resets the machine, streams an ELF executable into RAM and points
    /// PC at its entry point. On failure the machine stays in the reset
    /// state; nothing is partially visible.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), LoaderError> {
        self.reset();
        let entry = loader::load_elf(path, self.cpu.ram_mut())?;
        self.cpu.registers_mut().set_pc(entry);
        info!("program loaded, entry point {entry:#010X}");
        Ok(())
    }

    /// One fetch-decode-execute cycle. Returns whether the loop should
    /// continue: a zero fetched word or a halting instruction says no.
    /// Recoverable faults inside an instruction abort only that
    /// instruction; a fetch failure is fatal and surfaces as `Err`.
    pub fn step(&mut self) -> Result<bool, StepFault> {
        let pc = self.cpu.registers().pc();
        let bits = self.cpu.fetch().map_err(|fault| StepFault {
            step: self.steps + 1,
            fault,
        })?;

        // A zero word is not a step, it is the end of the program.
        if bits == 0 {
            return Ok(false);
        }
        self.steps += 1;

        let instruction = Instruction::decode(bits, self.cpu.registers());
        let proceed = match instruction.execute(&mut self.cpu) {
            Ok(proceed) => proceed,
            Err(error) => {
                warn!("instruction at {pc:#010X} aborted: {error}");
                true
            }
        };

        self.trace(pc);
        Ok(proceed)
    }

    /// Steps until the program halts or the token requests cancellation.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<RunOutcome, StepFault> {
        loop {
            if cancel.is_requested() {
                return Ok(RunOutcome::Cancelled);
            }
            if !self.step()? {
                return Ok(RunOutcome::Halted);
            }
        }
    }

    /// Starts writing one trace line per step to `sink`.
    pub fn enable_tracing(&mut self, sink: TraceSink) {
        self.trace_sink = Some(sink);
    }

    /// Stops tracing and drops the sink, flushing buffered writers.
    pub fn disable_tracing(&mut self) {
        self.trace_sink = None;
    }

    #[must_use]
    pub fn status(&self) -> ComputerStatus {
        let registers = self.cpu.registers();
        ComputerStatus {
            flags: registers.flags(),
            mode: registers.mode().to_string(),
            registers: (0..16)
                .map(|index| {
                    let value = if index == 15 {
                        registers.pc()
                    } else {
                        registers.get(index)
                    };
                    format!("{value:08X}")
                })
                .collect(),
            stack: self.stack_window(),
            disassembly: self.disassembly_window(),
            memory: self.memory_dump(),
            steps: self.steps,
            checksum: self.checksum(),
        }
    }

    #[must_use]
    pub fn checksum(&self) -> i32 {
        self.cpu.ram().checksum()
    }

    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Handle for a driver that drains the console output.
    #[must_use]
    pub fn console_handle(&self) -> IoQueue {
        self.cpu.console_handle()
    }

    /// Handle for a driver that feeds the keyboard input.
    #[must_use]
    pub fn keyboard_handle(&self) -> IoQueue {
        self.cpu.keyboard_handle()
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    fn trace(&mut self, pc: u32) {
        let Some(sink) = self.trace_sink.as_mut() else {
            return;
        };
        let line = trace_line(self.steps, pc, &self.cpu);
        if let Err(error) = writeln!(sink, "{line}") {
            warn!("trace sink write failed, tracing disabled: {error}");
            self.trace_sink = None;
        }
    }

    fn stack_window(&self) -> Vec<String> {
        let sp = self.cpu.registers().get(13);
        (0..STACK_WINDOW_WORDS)
            .map(|i| sp.wrapping_add(i * 4))
            .map_while(|address| {
                self.cpu
                    .ram()
                    .read_word(address)
                    .ok()
                    .map(|word| format!("{address:08X}: {word:08X}"))
            })
            .collect()
    }

    fn disassembly_window(&self) -> Vec<String> {
        // A couple of instructions of context before PC, the rest after.
        let start = self.cpu.registers().pc().saturating_sub(8);
        (0..DISASSEMBLY_WINDOW)
            .map(|i| start.wrapping_add(i * 4))
            .map_while(|address| {
                self.cpu.ram().read_word(address).ok().map(|word| {
                    let text = Instruction::decode(word, self.cpu.registers()).disassemble();
                    format!("{address:08X}  {word:08X}  {text}")
                })
            })
            .collect()
    }

    fn memory_dump(&self) -> Vec<String> {
        self.cpu
            .ram()
            .as_slice()
            .chunks(16)
            .enumerate()
            .map(|(line, chunk)| {
                let bytes: Vec<String> = chunk.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("{:08X}  {}", line * 16, bytes.join(" "))
            })
            .collect()
    }
}

/// One line of the golden trace format: step number, pre-step PC, memory
/// checksum, the N/Z/C/V bits and r0-r14.
fn trace_line(step: u64, pc: u32, cpu: &Cpu) -> String {
    let flags = cpu.registers().flags();
    let mut line = format!(
        "{step:06} {pc:08X} {checksum:08X} {}{}{}{}",
        u8::from(flags.negative),
        u8::from(flags.zero),
        u8::from(flags.carry),
        u8::from(flags.overflow),
        checksum = cpu.ram().checksum(),
    );
    for register in 0..=14 {
        line.push_str(&format!(" {register}={:08X}", cpu.registers().get(register)));
    }
    line
}
