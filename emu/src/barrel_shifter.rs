use std::fmt;

use crate::bitwise::Bits;
use crate::registers::RegisterFile;

/// Shift operation selector, bits 5-6 of the register operand form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl From<u32> for ShiftKind {
    fn from(bits: u32) -> Self {
        match bits {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            3 => Self::Ror,
            _ => unreachable!("shift kind field is 2 bits"),
        }
    }
}

impl fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            Self::Lsl => "lsl",
            Self::Lsr => "lsr",
            Self::Asr => "asr",
            Self::Ror => "ror",
        };
        write!(f, "{mnemonic}")
    }
}

/// How operand 2 was encoded. Kept for disassembly only; the shift itself
/// runs on the resolved `amount`/`data` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand2Form {
    /// 8-bit immediate rotated right by twice the 4-bit rotate field.
    Immediate,
    /// Register shifted by a 5-bit immediate amount.
    ShiftByImmediate { rm: u32 },
    /// Register shifted by the value of another register.
    ShiftByRegister { rm: u32, rs: u32 },
}

/// The shifter feeding operand 2 into the ALU. Built once per decoded
/// data-processing or load/store instruction and discarded with it.
#[derive(Debug, Clone, Copy)]
pub struct BarrelShifter {
    kind: ShiftKind,
    amount: u32,
    data: u32,
    form: Operand2Form,
}

impl BarrelShifter {
    /// Decodes the 12-bit operand-2 field. `immediate` is the instruction's
    /// I bit: a rotated 8-bit immediate instead of a shifted register.
    /// Register reads go through the register file and therefore see the
    /// pipelined PC value.
    #[must_use]
    pub fn from_operand2(operand2: u32, immediate: bool, registers: &RegisterFile) -> Self {
        if immediate {
            return Self {
                kind: ShiftKind::Ror,
                amount: operand2.get_bits(8..=11) * 2,
                data: operand2.get_bits(0..=7),
                form: Operand2Form::Immediate,
            };
        }

        let rm = operand2.get_bits(0..=3);
        let data = registers.get(rm);
        let kind = ShiftKind::from(operand2.get_bits(5..=6));

        if operand2.get_bit(4) {
            let rs = operand2.get_bits(8..=11);
            Self {
                kind,
                amount: registers.get(rs),
                data,
                form: Operand2Form::ShiftByRegister { rm, rs },
            }
        } else {
            Self {
                kind,
                amount: operand2.get_bits(7..=11),
                data,
                form: Operand2Form::ShiftByImmediate { rm },
            }
        }
    }

    /// Direct construction, used by the shifter tests.
    #[cfg(test)]
    pub(crate) const fn with(kind: ShiftKind, amount: u32, data: u32) -> Self {
        Self {
            kind,
            amount,
            data,
            form: Operand2Form::Immediate,
        }
    }

    /// Applies the shift and returns the 32-bit shifter operand.
    ///
    /// Shift amounts at or past the register width are pinned down
    /// explicitly instead of leaning on host shift behavior: LSL/LSR
    /// saturate to zero, ASR fills with the sign bit, ROR wraps.
    #[must_use]
    pub fn shift(&self) -> u32 {
        match self.kind {
            ShiftKind::Lsl => {
                if self.amount >= 32 {
                    0
                } else {
                    self.data << self.amount
                }
            }
            ShiftKind::Lsr => {
                if self.amount >= 32 {
                    0
                } else {
                    self.data >> self.amount
                }
            }
            ShiftKind::Asr => ((self.data as i32) >> self.amount.min(31)) as u32,
            // A rotate by 0 (or any multiple of 32) is a no-op.
            ShiftKind::Ror => self.data.rotate_right(self.amount % 32),
        }
    }

    /// Value of the Rm operand, used by multiply.
    #[must_use]
    pub const fn rm(&self) -> u32 {
        self.data
    }

    /// Value of the Rs operand, used by multiply.
    #[must_use]
    pub const fn rs(&self) -> u32 {
        self.amount
    }

    /// Register indices of the Rm/Rs fields when operand 2 is in the
    /// register-shifted-by-register form (the encoding multiply reuses).
    #[must_use]
    pub const fn register_operands(&self) -> Option<(u32, u32)> {
        match self.form {
            Operand2Form::ShiftByRegister { rm, rs } => Some((rm, rs)),
            _ => None,
        }
    }

    /// Operand-2 text for the disassembler.
    #[must_use]
    pub fn disassemble(&self) -> String {
        match self.form {
            Operand2Form::Immediate => format!("#{}", self.shift()),
            Operand2Form::ShiftByImmediate { rm } => {
                // A left shift by 0 is how plain `rN` operands are encoded.
                if self.kind == ShiftKind::Lsl && self.amount == 0 {
                    format!("r{rm}")
                } else {
                    format!("r{rm}, {} #{}", self.kind, self.amount)
                }
            }
            Operand2Form::ShiftByRegister { rm, rs } => {
                format!("r{rm}, {} r{rs}", self.kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ror() {
        assert_eq!(BarrelShifter::with(ShiftKind::Ror, 0, 0xF).shift(), 0xF);
        assert_eq!(
            BarrelShifter::with(ShiftKind::Ror, 2, 0xF).shift(),
            0xC000_0003
        );
        assert_eq!(BarrelShifter::with(ShiftKind::Ror, 32, 0xF).shift(), 0xF);
    }

    #[test]
    fn lsl() {
        assert_eq!(BarrelShifter::with(ShiftKind::Lsl, 0, 0xF).shift(), 0xF);
        assert_eq!(BarrelShifter::with(ShiftKind::Lsl, 2, 0xF).shift(), 0x3C);
        assert_eq!(BarrelShifter::with(ShiftKind::Lsl, 4, 0xF).shift(), 0xF0);
        // Saturates to zero at the register width, deliberately.
        assert_eq!(BarrelShifter::with(ShiftKind::Lsl, 32, 0xF).shift(), 0x0);
        assert_eq!(BarrelShifter::with(ShiftKind::Lsl, 40, 0xF).shift(), 0x0);
    }

    #[test]
    fn lsr() {
        assert_eq!(BarrelShifter::with(ShiftKind::Lsr, 1, 0x50).shift(), 0x28);
        assert_eq!(BarrelShifter::with(ShiftKind::Lsr, 3, 0x40).shift(), 0x8);
        assert_eq!(BarrelShifter::with(ShiftKind::Lsr, 32, 0xF).shift(), 0x0);
    }

    #[test]
    fn asr_drags_the_sign_bit() {
        assert_eq!(
            BarrelShifter::with(ShiftKind::Asr, 4, 0x8000_0000).shift(),
            0xF800_0000
        );
        assert_eq!(BarrelShifter::with(ShiftKind::Asr, 4, 0x40).shift(), 0x4);
        assert_eq!(
            BarrelShifter::with(ShiftKind::Asr, 32, 0x8000_0000).shift(),
            0xFFFF_FFFF
        );
        assert_eq!(BarrelShifter::with(ShiftKind::Asr, 32, 0x40).shift(), 0x0);
    }

    #[test]
    fn immediate_operand_is_rotated() {
        let registers = RegisterFile::new();

        // mov r2, #0x30: no rotate
        let shifter = BarrelShifter::from_operand2(0x030, true, &registers);
        assert_eq!(shifter.shift(), 0x30);

        // mov r2, #0x30 with rotate field 1: ror(0x30, 2)
        let shifter = BarrelShifter::from_operand2(0x130, true, &registers);
        assert_eq!(shifter.shift(), 0xC);
    }

    #[test]
    fn register_operand_with_immediate_shift() {
        let mut registers = RegisterFile::new();
        registers.set(1, 0x50);

        // r1, lsr #1
        let shifter = BarrelShifter::from_operand2(0x0A1, false, &registers);
        assert_eq!(shifter.shift(), 0x28);
    }

    #[test]
    fn register_operand_with_register_shift() {
        let mut registers = RegisterFile::new();
        registers.set(1, 0x40);
        registers.set(3, 0x3);

        // r1, lsr r3
        let shifter = BarrelShifter::from_operand2(0x331, false, &registers);
        assert_eq!(shifter.shift(), 0x8);
        assert_eq!(shifter.register_operands(), Some((1, 3)));
    }

    #[test]
    fn disassembles_each_form() {
        let mut registers = RegisterFile::new();
        registers.set(1, 0x50);
        registers.set(3, 0x1);

        let immediate = BarrelShifter::from_operand2(0x030, true, &registers);
        assert_eq!(immediate.disassemble(), "#48");

        let shifted = BarrelShifter::from_operand2(0x0A1, false, &registers);
        assert_eq!(shifted.disassemble(), "r1, lsr #1");

        let by_register = BarrelShifter::from_operand2(0x331, false, &registers);
        assert_eq!(by_register.disassemble(), "r1, lsr r3");

        // lsl #0 folds down to the bare register
        let bare = BarrelShifter::from_operand2(0x001, false, &registers);
        assert_eq!(bare.disassemble(), "r1");
    }
}
