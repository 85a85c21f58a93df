use std::fmt;

use serde::Serialize;

use crate::bitwise::Bits;
use crate::memory::Memory;

/// Byte offsets of each register slot inside the bank (register index × 4).
pub mod reg {
    pub const R13: u32 = 52;
    pub const R14: u32 = 56;
    pub const R15: u32 = 60;
    pub const CPSR: u32 = 64;
    pub const SPSR: u32 = 68;
    pub const R13_SVC: u32 = 72;
    pub const R14_SVC: u32 = 76;
    pub const R13_IRQ: u32 = 80;
    pub const R14_IRQ: u32 = 84;
    pub const SPSR_SVC: u32 = 88;
    pub const SPSR_IRQ: u32 = 96;

    pub const SP: u32 = R13;
    pub const LR: u32 = R14;
    pub const PC: u32 = R15;

    /// Size of the whole bank in bytes (one reserved slot before SPSR_IRQ).
    pub const BANK_SIZE: u32 = 100;

    /// Slot address of a register index as found in an instruction field.
    #[must_use]
    pub const fn address_of(index: u32) -> u32 {
        index * 4
    }
}

/// CPSR flag bit positions.
const N: u32 = 31;
const Z: u32 = 30;
const C: u32 = 29;
const V: u32 = 28;

/// Snapshot of the four condition bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    pub negative: bool,
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
}

/// Processor mode, encoded in CPSR bits 0-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User = 0x10,
    Irq = 0x12,
    Supervisor = 0x13,
    System = 0x1F,
}

impl Mode {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0x10 => Some(Self::User),
            0x12 => Some(Self::Irq),
            0x13 => Some(Self::Supervisor),
            0x1F => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Irq => "IRQ",
            Self::Supervisor => "Supervisor",
            Self::System => "System",
        };
        write!(f, "{name}")
    }
}

/// Which physical copies of r13/r14/SPSR a mode sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Normal,
    Svc,
    Irq,
}

impl Bank {
    #[must_use]
    pub const fn of(mode: Mode) -> Self {
        match mode {
            Mode::User | Mode::System => Self::Normal,
            Mode::Supervisor => Self::Svc,
            Mode::Irq => Self::Irq,
        }
    }

    /// Byte distance from a banked-capable slot to this bank's copy.
    const fn slot_offset(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Svc => reg::R13_SVC - reg::R13,
            Self::Irq => reg::R13_IRQ - reg::R13,
        }
    }
}

/// The register bank: r0-r15, CPSR, SPSR plus the supervisor and IRQ
/// copies of r13/r14/SPSR, stored as a 100-byte [`Memory`] addressed by
/// register index × 4.
///
/// All access goes through one indirection point that resolves the banked
/// slots from the current CPSR mode, so the banking rule stays auditable.
pub struct RegisterFile {
    bank: Memory,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bank: Memory::new(reg::BANK_SIZE),
        }
    }

    /// Clears every slot. Used by machine reset.
    pub fn zero(&mut self) {
        self.bank.zero();
    }

    /// Reads a register by its instruction-field index (0-15). r13/r14 are
    /// redirected to the mode's bank; PC reads return the stored value + 4
    /// to compensate for pipelining (fetch already advanced it by 4, ARM
    /// semantics expect the fetch address + 8).
    #[must_use]
    pub fn get(&self, index: u32) -> u32 {
        let value = self.read_address(self.banked_address(reg::address_of(index)));
        if index == 15 { value.wrapping_add(4) } else { value }
    }

    /// Writes a register by its instruction-field index (0-15), redirecting
    /// r13/r14 to the mode's bank.
    pub fn set(&mut self, index: u32, value: u32) {
        self.write_address(self.banked_address(reg::address_of(index)), value);
    }

    /// Raw slot read with no banking and no PC adjustment.
    #[must_use]
    pub fn read_address(&self, address: u32) -> u32 {
        // Slot addresses are compile-time constants or 4-bit instruction
        // fields scaled by 4, so they always land inside the bank.
        self.bank
            .read_word(address)
            .expect("register slot address inside the bank")
    }

    /// Raw slot write with no banking.
    pub fn write_address(&mut self, address: u32, value: u32) {
        self.bank
            .write_word(address, value)
            .expect("register slot address inside the bank");
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.read_address(reg::PC)
    }

    pub fn set_pc(&mut self, value: u32) {
        self.write_address(reg::PC, value);
    }

    #[must_use]
    pub fn cpsr(&self) -> u32 {
        self.read_address(reg::CPSR)
    }

    pub fn set_cpsr(&mut self, value: u32) {
        self.write_address(reg::CPSR, value);
    }

    /// SPSR access is banked exactly like r13/r14.
    #[must_use]
    pub fn spsr(&self) -> u32 {
        self.read_address(self.banked_address(reg::SPSR))
    }

    pub fn set_spsr(&mut self, value: u32) {
        self.write_address(self.banked_address(reg::SPSR), value);
    }

    /// Current mode from CPSR bits 0-4. Unrecognized bit patterns fall back
    /// to User, which resolves to the unbanked register set.
    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.cpsr().get_bits(0..=4)).unwrap_or(Mode::User)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        let mut cpsr = self.cpsr();
        cpsr = (cpsr & !0x1F) | mode as u32;
        self.set_cpsr(cpsr);
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        let cpsr = self.cpsr();
        Flags {
            negative: cpsr.get_bit(N),
            zero: cpsr.get_bit(Z),
            carry: cpsr.get_bit(C),
            overflow: cpsr.get_bit(V),
        }
    }

    pub fn set_flags(&mut self, flags: Flags) {
        let mut cpsr = self.cpsr();
        cpsr.set_bit(N, flags.negative);
        cpsr.set_bit(Z, flags.zero);
        cpsr.set_bit(C, flags.carry);
        cpsr.set_bit(V, flags.overflow);
        self.set_cpsr(cpsr);
    }

    fn banked_address(&self, address: u32) -> u32 {
        match address {
            reg::R13 | reg::R14 | reg::SPSR => address + Bank::of(self.mode()).slot_offset(),
            _ => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_register_round_trip() {
        let mut registers = RegisterFile::new();
        registers.set(2, 48);
        assert_eq!(registers.get(2), 48);
        assert_eq!(registers.read_address(reg::address_of(2)), 48);
    }

    #[test]
    fn pc_reads_are_pipelined() {
        let mut registers = RegisterFile::new();
        registers.set_pc(0x1000);
        assert_eq!(registers.pc(), 0x1000);
        assert_eq!(registers.get(15), 0x1004);
    }

    #[test]
    fn pc_writes_are_not_adjusted() {
        let mut registers = RegisterFile::new();
        registers.set(15, 0x2000);
        assert_eq!(registers.pc(), 0x2000);
    }

    #[test]
    fn user_and_system_modes_are_unbanked() {
        for mode in [Mode::User, Mode::System] {
            let mut registers = RegisterFile::new();
            registers.set_mode(mode);
            registers.set(13, 0x7000);
            assert_eq!(registers.read_address(reg::R13), 0x7000);
            assert_eq!(registers.read_address(reg::R13_SVC), 0);
            assert_eq!(registers.read_address(reg::R13_IRQ), 0);
        }
    }

    #[test]
    fn supervisor_mode_uses_the_svc_bank() {
        let mut registers = RegisterFile::new();
        registers.set_mode(Mode::Supervisor);

        registers.set(13, 0x7200);
        registers.set(14, 0xCAFE);
        registers.set_spsr(0x1F);

        assert_eq!(registers.read_address(reg::R13_SVC), 0x7200);
        assert_eq!(registers.read_address(reg::R14_SVC), 0xCAFE);
        assert_eq!(registers.read_address(reg::SPSR_SVC), 0x1F);
        assert_eq!(registers.read_address(reg::R13), 0);
        assert_eq!(registers.read_address(reg::SPSR), 0);

        // Dropping back to user mode exposes the unbanked copies again.
        registers.set_mode(Mode::User);
        assert_eq!(registers.get(13), 0);
        assert_eq!(registers.get(14), 0);
    }

    #[test]
    fn irq_mode_uses_the_irq_bank() {
        let mut registers = RegisterFile::new();
        registers.set_mode(Mode::Irq);

        registers.set(13, 0x7100);
        registers.set(14, 0xBEEF);
        registers.set_spsr(0x13);

        assert_eq!(registers.read_address(reg::R13_IRQ), 0x7100);
        assert_eq!(registers.read_address(reg::R14_IRQ), 0xBEEF);
        assert_eq!(registers.read_address(reg::SPSR_IRQ), 0x13);
        assert_eq!(registers.read_address(reg::R13), 0);
    }

    #[test]
    fn bank_resolution_table() {
        assert_eq!(Bank::of(Mode::User), Bank::Normal);
        assert_eq!(Bank::of(Mode::System), Bank::Normal);
        assert_eq!(Bank::of(Mode::Supervisor), Bank::Svc);
        assert_eq!(Bank::of(Mode::Irq), Bank::Irq);
    }

    #[test]
    fn flags_round_trip() {
        let mut registers = RegisterFile::new();
        let flags = Flags {
            negative: true,
            zero: false,
            carry: true,
            overflow: false,
        };
        registers.set_flags(flags);
        assert_eq!(registers.flags(), flags);
        // N and C are bits 31 and 29
        assert_eq!(registers.cpsr(), 0xA000_0000);
    }

    #[test]
    fn setting_flags_preserves_the_mode() {
        let mut registers = RegisterFile::new();
        registers.set_mode(Mode::Supervisor);
        registers.set_flags(Flags {
            zero: true,
            ..Flags::default()
        });
        assert_eq!(registers.mode(), Mode::Supervisor);
    }

    #[test]
    fn zeroed_cpsr_falls_back_to_user_mode() {
        let registers = RegisterFile::new();
        assert_eq!(registers.mode(), Mode::User);
    }
}
