//! Method bodies.

use crate::{
    cfg::ControlFlowGraph,
    ir::{
        encoding,
        entry::MethodItemEntry,
        instruction::{IrInstruction, Reg, MAX_REGISTER},
        Pool,
    },
    Error, Result,
};

/// A method body, in linear or in CFG form.
///
/// While the CFG is built, the linear entry list is empty and the register count lives
/// in the graph.
#[derive(Debug, Clone)]
pub struct IrCode {
    registers_size: u32,
    entries: Vec<MethodItemEntry>,
    cfg: Option<ControlFlowGraph>,
}

impl IrCode {
    /// A body in linear form.
    #[must_use]
    pub fn new(registers_size: u32, entries: Vec<MethodItemEntry>) -> Self {
        IrCode {
            registers_size,
            entries,
            cfg: None,
        }
    }

    /// Number of registers.
    #[must_use]
    pub fn registers_size(&self) -> u32 {
        self.cfg
            .as_ref()
            .map_or(self.registers_size, ControlFlowGraph::registers_size)
    }

    /// Overrides the number of registers.
    pub fn set_registers_size(&mut self, size: u32) {
        match &mut self.cfg {
            Some(cfg) => cfg.set_registers_size(size),
            None => self.registers_size = size,
        }
    }

    /// Reserves a fresh register (or pair) past the current register file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingOverflow`] beyond the 16-bit register space.
    pub fn allocate_temp(&mut self, wide: bool) -> Result<Reg> {
        if let Some(cfg) = &mut self.cfg {
            return cfg.allocate_temp(wide);
        }
        let reg = self.registers_size;
        let width = if wide { 2 } else { 1 };
        if reg + width - 1 > MAX_REGISTER {
            return Err(Error::EncodingOverflow(format!(
                "temporary v{reg} exceeds the register file"
            )));
        }
        self.registers_size += width;
        Ok(reg)
    }

    /// The linear entries. Empty while the CFG is built.
    #[must_use]
    pub fn entries(&self) -> &[MethodItemEntry] {
        &self.entries
    }

    /// The linear entries, mutably.
    pub fn entries_mut(&mut self) -> &mut Vec<MethodItemEntry> {
        &mut self.entries
    }

    /// `true` while the body is in CFG form.
    #[must_use]
    pub fn editable_cfg_built(&self) -> bool {
        self.cfg.is_some()
    }

    /// Converts the body to CFG form. Does nothing if it already is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBody`] if the linear body is inconsistent; the body
    /// stays in linear form.
    pub fn build_cfg(&mut self, pool: &Pool) -> Result<()> {
        if self.cfg.is_some() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.entries);
        match ControlFlowGraph::build(entries.clone(), self.registers_size, pool) {
            Ok(cfg) => {
                self.cfg = Some(cfg);
                Ok(())
            }
            Err(err) => {
                self.entries = entries;
                Err(err)
            }
        }
    }

    /// Converts the body back to linear form. Does nothing if it already is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] if the graph can not be laid out; the body stays
    /// in CFG form.
    pub fn clear_cfg(&mut self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };
        let entries = cfg.linearize()?;
        self.registers_size = cfg.registers_size();
        self.entries = entries;
        self.cfg = None;
        Ok(())
    }

    /// The CFG, if built.
    #[must_use]
    pub fn cfg(&self) -> Option<&ControlFlowGraph> {
        self.cfg.as_ref()
    }

    /// The CFG, mutably, if built.
    pub fn cfg_mut(&mut self) -> Option<&mut ControlFlowGraph> {
        self.cfg.as_mut()
    }

    /// Iterates the instructions in either form.
    pub fn insns(&self) -> Box<dyn Iterator<Item = &IrInstruction> + '_> {
        match &self.cfg {
            Some(cfg) => Box::new(cfg.instructions().map(|(_, insn)| insn)),
            None => Box::new(self.entries.iter().filter_map(MethodItemEntry::as_insn)),
        }
    }

    /// Number of instructions.
    #[must_use]
    pub fn count_insns(&self) -> usize {
        self.insns().count()
    }

    /// Number of incoming argument words, from the `load-param*` instructions.
    #[must_use]
    pub fn ins_size(&self) -> u32 {
        self.insns()
            .filter(|i| i.opcode().is_load_param())
            .map(|i| if i.opcode().dest_is_wide() { 2 } else { 1 })
            .sum()
    }

    /// Largest number of argument words passed by an invoke.
    #[must_use]
    pub fn outs_size(&self, pool: &Pool) -> u32 {
        let words = self
            .insns()
            .filter(|i| i.opcode().is_invoke())
            .map(|i| i.arg_words(pool))
            .max()
            .unwrap_or(0);
        u32::try_from(words).unwrap_or(u32::MAX)
    }

    /// Estimated size in 16-bit code units, payloads included.
    ///
    /// In CFG form the `goto`s that linearisation would add are not counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingOverflow`] if an instruction can not be encoded.
    pub fn estimate_code_units(&self, pool: &Pool) -> Result<usize> {
        self.insns()
            .map(|insn| encoding::insn_units_with_payload(insn, pool))
            .sum()
    }

    /// Checks that every instruction is well formed and encodable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedBody`] for an inconsistent instruction and
    /// [`Error::EncodingOverflow`] for one the container format can not encode.
    pub fn sync_check(&self, pool: &Pool) -> Result<()> {
        let registers = self.registers_size();
        for insn in self.insns() {
            insn.validate(pool)?;
            encoding::select(insn, pool)?;
            let beyond = insn
                .def_slots()
                .into_iter()
                .chain(insn.use_slots(pool))
                .find(|r| *r >= registers);
            if let Some(r) = beyond {
                return Err(malformed_body!(
                    "{} uses v{} beyond {} registers",
                    insn.opcode(),
                    r,
                    registers
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{builder::CodeBuilder, opcode::IrOpcode};

    #[test]
    fn round_trip_keeps_register_count() {
        let pool = Pool::new();
        let mut code = CodeBuilder::new(3)
            .insn(IrInstruction::const_(0, 7))
            .insn(IrInstruction::new(IrOpcode::Return).with_srcs(&[0]))
            .build();
        code.build_cfg(&pool).unwrap();
        assert!(code.editable_cfg_built());
        assert_eq!(code.allocate_temp(true).unwrap(), 3);
        code.clear_cfg().unwrap();
        assert_eq!(code.registers_size(), 5);
        assert_eq!(code.count_insns(), 2);
        code.sync_check(&pool).unwrap();
    }

    #[test]
    fn failed_build_keeps_linear_form() {
        let pool = Pool::new();
        let mut code = CodeBuilder::new(1)
            .insn(IrInstruction::const_(0, 7))
            .build();
        assert!(code.build_cfg(&pool).is_err());
        assert!(!code.editable_cfg_built());
        assert_eq!(code.count_insns(), 1);
    }
}
