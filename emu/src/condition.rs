use std::fmt;

use tracing::warn;

use crate::registers::RegisterFile;

/// Instruction condition field, bits 28-31 of every encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    EQ = 0x0,
    NE = 0x1,
    CS = 0x2,
    CC = 0x3,
    MI = 0x4,
    PL = 0x5,
    VS = 0x6,
    VC = 0x7,
    HI = 0x8,
    LS = 0x9,
    GE = 0xA,
    LT = 0xB,
    GT = 0xC,
    LE = 0xD,
    AL = 0xE,
    /// 0xF is unpredictable on this architecture subset.
    UNP = 0xF,
}

impl From<u32> for Condition {
    fn from(bits: u32) -> Self {
        match bits {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            0xF => Self::UNP,
            _ => unreachable!("condition field is 4 bits"),
        }
    }
}

impl Condition {
    /// Tests the condition against the current N/Z/C/V flags. A failed test
    /// turns the owning instruction into a no-op.
    pub fn is_met(self, registers: &RegisterFile) -> bool {
        let flags = registers.flags();
        match self {
            Self::EQ => flags.zero,
            Self::NE => !flags.zero,
            Self::CS => flags.carry,
            Self::CC => !flags.carry,
            Self::MI => flags.negative,
            Self::PL => !flags.negative,
            Self::VS => flags.overflow,
            Self::VC => !flags.overflow,
            Self::HI => flags.carry && !flags.zero,
            Self::LS => !flags.carry || flags.zero,
            Self::GE => flags.negative == flags.overflow,
            Self::LT => flags.negative != flags.overflow,
            Self::GT => !flags.zero && (flags.negative == flags.overflow),
            Self::LE => flags.zero || (flags.negative != flags.overflow),
            Self::AL => true,
            Self::UNP => {
                warn!("unpredictable condition code, ignoring and executing");
                true
            }
        }
    }

    /// Mnemonic suffix for disassembly. AL is the default and renders empty.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::EQ => "eq",
            Self::NE => "ne",
            Self::CS => "cs",
            Self::CC => "cc",
            Self::MI => "mi",
            Self::PL => "pl",
            Self::VS => "vs",
            Self::VC => "vc",
            Self::HI => "hi",
            Self::LS => "ls",
            Self::GE => "ge",
            Self::LT => "lt",
            Self::GT => "gt",
            Self::LE => "le",
            Self::AL => "",
            Self::UNP => "unp",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}
