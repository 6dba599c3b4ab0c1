
use crate::{ArmCode, Function, Inst};
use std::fmt::Result;

#[derive(Debug, Clone, Default)]
pub struct ArmOutputConfig {
    /// If `false`, the outputter panics when it encounters a virtual
    /// register. Dumps between passes set this to `true`; final emission
    /// must not.
    pub allow_virtuals: bool,
}

/// Formats [`ArmCode`] to a writer as GNU assembler input.
///
/// Each function is preceded by a `.global` directive; its instructions are
/// printed one mnemonic per line with canonical operand syntax, followed by
/// the function-local literal pool.
pub struct ArmOutputter<'w, W: std::fmt::Write> {
    writer: &'w mut W,
    config: ArmOutputConfig,
}

impl<'w, W: std::fmt::Write> ArmOutputter<'w, W> {
    pub fn new(writer: &'w mut W) -> Self {
        Self {
            writer,
            config: Default::default(),
        }
    }

    pub fn with_config(self, config: ArmOutputConfig) -> Self {
        Self { config, ..self }
    }

    pub fn write_code(&mut self, value: &ArmCode) -> Result {
        if !value.consts.is_empty() {
            self.writer.write_str("\t.data\n")?;
            for (label, data) in &value.consts {
                writeln!(self.writer, "\t.global\t{label}")?;
                writeln!(self.writer, "{label}:")?;
                writeln!(self.writer, "{data}")?;
            }
        }
        self.writer.write_str("\t.text\n")?;
        for function in &value.functions {
            self.writer.write_char('\n')?;
            self.write_function(function)?;
        }
        Ok(())
    }

    pub fn write_function(&mut self, value: &Function) -> Result {
        writeln!(self.writer, "\t.global\t{}", value.name)?;
        writeln!(self.writer, "{}:", value.name)?;
        for inst in &value.inst {
            self.write_inst(inst)?;
        }
        for (label, data) in &value.consts {
            writeln!(self.writer, "{label}:")?;
            writeln!(self.writer, "{data}")?;
        }
        if value.uses_literal_pool() {
            self.writer.write_str("\t.ltorg\n")?;
        }
        Ok(())
    }

    fn write_inst(&mut self, value: &Inst) -> Result {
        if !self.config.allow_virtuals && value.has_virtual() {
            panic!("formatting virtual registers not allowed");
        }
        match value {
            Inst::Label(_) => writeln!(self.writer, "{value}"),
            _ => writeln!(self.writer, "\t{value}"),
        }
    }
}
