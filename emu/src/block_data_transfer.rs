use tracing::warn;

use crate::bitwise::Bits;
use crate::condition::Condition;
use crate::cpu::Cpu;
use crate::memory::MemoryError;

/// A decoded block data transfer (LDM/STM).
#[derive(Debug, Clone, Copy)]
pub struct BlockDataTransfer {
    condition: Condition,
    pre_index: bool,
    up: bool,
    psr: bool,
    writeback: bool,
    load: bool,
    rn: u32,
    register_list: u32,
}

impl BlockDataTransfer {
    pub(crate) fn decode(bits: u32) -> Self {
        Self {
            condition: Condition::from(bits.get_bits(28..=31)),
            pre_index: bits.get_bit(24),
            up: bits.get_bit(23),
            psr: bits.get_bit(22),
            writeback: bits.get_bit(21),
            load: bits.get_bit(20),
            rn: bits.get_bits(16..=19),
            register_list: bits.get_bits(0..=15),
        }
    }

    pub(crate) fn execute(&self, cpu: &mut Cpu) -> Result<bool, MemoryError> {
        if !self.condition.is_met(cpu.registers()) {
            return Ok(true);
        }
        if self.psr {
            warn!("S bit set on a block transfer, user-bank transfer is not modeled");
        }

        let base = cpu.fetch_register(self.rn);
        let span = 4 * self.register_list.count_ones();

        // The four P/U addressing modes collapse to a start address; the
        // transfers then walk upward in steps of 4, lowest register at the
        // lowest address.
        let start = match (self.pre_index, self.up) {
            (true, true) => base.wrapping_add(4),             // increment before
            (false, true) => base,                            // increment after
            (true, false) => base.wrapping_sub(span),         // decrement before
            (false, false) => base.wrapping_sub(span).wrapping_add(4), // decrement after
        };

        let mut address = start;
        for register in 0..16 {
            if !self.register_list.get_bit(register) {
                continue;
            }
            if self.load {
                let value = cpu.read_word(address)?;
                cpu.write_register(register, value);
            } else {
                let value = cpu.fetch_register(register);
                cpu.write_word(address, value)?;
            }
            address = address.wrapping_add(4);
        }

        if self.writeback {
            let new_base = if self.up {
                base.wrapping_add(span)
            } else {
                base.wrapping_sub(span)
            };
            // The writeback target follows the Rn field, whatever it is.
            cpu.write_register(self.rn, new_base);
        }

        Ok(true)
    }

    pub(crate) fn disassemble(&self) -> String {
        let mnemonic = if self.load { "ldm" } else { "stm" };
        let mode = match (self.pre_index, self.up) {
            (true, true) => "ib",
            (false, true) => "ia",
            (true, false) => "db",
            (false, false) => "da",
        };
        let writeback = if self.writeback { "!" } else { "" };

        let registers: Vec<String> = (0..16)
            .filter(|register| self.register_list.get_bit(*register))
            .map(|register| format!("r{register}"))
            .collect();

        format!(
            "{mnemonic}{}{mode} r{}{writeback}, {{{}}}",
            self.condition,
            self.rn,
            registers.join(", ")
        )
    }
}
