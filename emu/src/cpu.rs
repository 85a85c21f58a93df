use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::memory::{Memory, MemoryError};
use crate::registers::RegisterFile;
use crate::ring_buffer::RingBuffer;

/// Memory-mapped console output port. Write-only.
pub const CONSOLE_ADDRESS: u32 = 0x0010_0000;

/// Memory-mapped keyboard input port. Read-only.
pub const KEYBOARD_ADDRESS: u32 = 0x0010_0001;

/// Capacity of each memory-mapped I/O queue.
const IO_QUEUE_CAPACITY: usize = 1024;

/// Shared handle to one of the memory-mapped I/O queues. These queues are
/// the only state shared with a driver running on another task; everything
/// else is confined to the execution task.
pub type IoQueue = Arc<Mutex<RingBuffer<u8>>>;

/// A fetch-stage failure. Unlike ordinary instruction-level memory faults
/// this is fatal: there is no sane continuation without a valid program
/// counter, so the step loop terminates with this diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchFault {
    pub pc: u32,
    pub cause: MemoryError,
}

impl fmt::Display for FetchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot fetch the instruction at PC {:#010X}: {}",
            self.pc, self.cause
        )
    }
}

impl std::error::Error for FetchFault {}

/// The processor: owns RAM and the register file, runs the fetch stage and
/// routes data accesses through the memory-mapped I/O ports.
pub struct Cpu {
    ram: Memory,
    registers: RegisterFile,
    console: IoQueue,
    keyboard: IoQueue,
}

impl Cpu {
    #[must_use]
    pub fn new(ram: Memory) -> Self {
        Self {
            ram,
            registers: RegisterFile::new(),
            console: Arc::new(Mutex::new(RingBuffer::new(IO_QUEUE_CAPACITY))),
            keyboard: Arc::new(Mutex::new(RingBuffer::new(IO_QUEUE_CAPACITY))),
        }
    }

    #[must_use]
    pub fn ram(&self) -> &Memory {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Memory {
        &mut self.ram
    }

    #[must_use]
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Handle for a driver that drains the console output.
    #[must_use]
    pub fn console_handle(&self) -> IoQueue {
        Arc::clone(&self.console)
    }

    /// Handle for a driver that feeds the keyboard input.
    #[must_use]
    pub fn keyboard_handle(&self) -> IoQueue {
        Arc::clone(&self.keyboard)
    }

    /// Reads the instruction word at PC and advances PC by 4.
    pub fn fetch(&mut self) -> Result<u32, FetchFault> {
        let pc = self.registers.pc();
        let instruction = self
            .ram
            .read_word(pc)
            .map_err(|cause| FetchFault { pc, cause })?;
        self.registers.set_pc(pc.wrapping_add(4));
        Ok(instruction)
    }

    /// Banked register read by instruction-field index; PC reads come back
    /// pipelined (+4 on top of the already advanced stored value).
    #[must_use]
    pub fn fetch_register(&self, index: u32) -> u32 {
        self.registers.get(index)
    }

    /// Banked register write by instruction-field index.
    pub fn write_register(&mut self, index: u32, data: u32) {
        self.registers.set(index, data);
    }

    /// Data-side byte read, intercepting the I/O ports before RAM.
    pub fn read_byte(&mut self, address: u32) -> Result<u8, MemoryError> {
        match address {
            CONSOLE_ADDRESS => {
                warn!("read from the write-only console port, returning 0");
                Ok(0)
            }
            // Non-blocking: an empty keyboard queue reads as 0.
            KEYBOARD_ADDRESS => Ok(self.keyboard.lock().unwrap().pop().unwrap_or(0)),
            _ => self.ram.read_byte(address),
        }
    }

    /// Data-side byte write, intercepting the I/O ports before RAM.
    pub fn write_byte(&mut self, address: u32, data: u8) -> Result<(), MemoryError> {
        match address {
            CONSOLE_ADDRESS => {
                self.console.lock().unwrap().push(data);
                Ok(())
            }
            KEYBOARD_ADDRESS => {
                warn!("write to the read-only keyboard port, dropped");
                Ok(())
            }
            _ => self.ram.write_byte(address, data),
        }
    }

    /// Data-side word read, intercepting the I/O ports before RAM.
    pub fn read_word(&mut self, address: u32) -> Result<u32, MemoryError> {
        match address {
            CONSOLE_ADDRESS => {
                warn!("read from the write-only console port, returning 0");
                Ok(0)
            }
            KEYBOARD_ADDRESS => Ok(u32::from(
                self.keyboard.lock().unwrap().pop().unwrap_or(0),
            )),
            _ => self.ram.read_word(address),
        }
    }

    /// Data-side word write, intercepting the I/O ports before RAM. The
    /// console is a byte stream, so a word write pushes the low byte.
    pub fn write_word(&mut self, address: u32, data: u32) -> Result<(), MemoryError> {
        match address {
            CONSOLE_ADDRESS => {
                self.console.lock().unwrap().push(data as u8);
                Ok(())
            }
            KEYBOARD_ADDRESS => {
                warn!("write to the read-only keyboard port, dropped");
                Ok(())
            }
            _ => self.ram.write_word(address, data),
        }
    }
}
