use crate::{
    namespace::Namespace,
    sdt::{AmlTable, Signature},
};
use alloc::string::String;
use core::fmt;

/// Decodes the AML in a table into the namespace. Method bodies, `If`, `Else` and `While` blocks must be
/// materialized as scope-capable entities, whose children are the instructions in program order, and nested
/// expressions as detached entities referenced by `Operand::Expr`.
pub trait AmlParser: Send {
    fn parse_aml(
        &mut self,
        namespace: &mut Namespace,
        table_handle: u8,
        table_name: Signature,
        table: &AmlTable<'_>,
    ) -> Result<(), ParseError>;
}

/// Reported by an [`AmlParser`] when a table can't be decoded. `module` names the part of the parser that
/// failed.
#[derive(Clone, PartialEq, Debug)]
pub struct ParseError {
    pub module: String,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}
