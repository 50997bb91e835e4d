//! Scope-aware variable address allocator.
//!
//! Declarations push onto a single stack; `{` records the stack depth and
//! `}` truncates back to it.  Lookups walk the stack newest-first, so an
//! inner declaration shadows an outer one until its scope closes.
//!
//! Addresses come from one monotonically increasing counter shared with
//! parameter-map slots.  Address 0 is reserved and an address is never
//! handed out twice within one compilation.

use std::collections::HashMap;

use crate::error::CompileError;

/// A declared variable and the memory address it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u16,
}

#[derive(Debug)]
pub struct SymbolTable {
    variables: Vec<Symbol>,
    scope_marks: Vec<usize>,
    slots: HashMap<String, u16>,
    next_address: u32,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            scope_marks: Vec::new(),
            slots: HashMap::new(),
            next_address: 1,
        }
    }

    fn allocate(&mut self) -> Result<u16, CompileError> {
        let address =
            u16::try_from(self.next_address).map_err(|_| CompileError::AddressSpaceExhausted)?;
        self.next_address += 1;
        Ok(address)
    }

    /// Declare `name` in the innermost scope and return its fresh address.
    pub fn declare(&mut self, name: &str) -> Result<u16, CompileError> {
        let address = self.allocate()?;
        self.variables.push(Symbol {
            name: name.to_string(),
            address,
        });
        Ok(address)
    }

    /// Address of the most recent visible declaration of `name`.
    pub fn resolve(&self, name: &str) -> Option<u16> {
        self.variables
            .iter()
            .rev()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.address)
    }

    /// Slot for a parameter map, shared by every map with identical text.
    pub fn slot(&mut self, key: &str) -> Result<u16, CompileError> {
        if let Some(address) = self.slots.get(key) {
            return Ok(*address);
        }
        let address = self.allocate()?;
        self.slots.insert(key.to_string(), address);
        Ok(address)
    }

    pub fn enter_scope(&mut self) {
        self.scope_marks.push(self.variables.len());
    }

    /// Close the innermost scope. Returns `false` when no scope is open.
    pub fn exit_scope(&mut self) -> bool {
        match self.scope_marks.pop() {
            Some(depth) => {
                self.variables.truncate(depth);
                true
            }
            None => false,
        }
    }

    pub fn depth(&self) -> usize {
        self.scope_marks.len()
    }

    /// Variables currently visible, oldest first.
    pub fn visible(&self) -> &[Symbol] {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_start_at_one_and_increase() {
        let mut table = SymbolTable::new();
        assert_eq!(table.declare("a").unwrap(), 1);
        assert_eq!(table.declare("b").unwrap(), 2);
    }

    #[test]
    fn inner_declaration_shadows_until_scope_closes() {
        let mut table = SymbolTable::new();
        let outer = table.declare("a").unwrap();
        table.enter_scope();
        let inner = table.declare("a").unwrap();
        assert_ne!(outer, inner);
        assert_eq!(table.resolve("a"), Some(inner));
        assert!(table.exit_scope());
        assert_eq!(table.resolve("a"), Some(outer));
    }

    #[test]
    fn addresses_are_not_reused_after_scope_exit() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        let first = table.declare("tmp").unwrap();
        table.exit_scope();
        assert_eq!(table.resolve("tmp"), None);
        let second = table.declare("tmp").unwrap();
        assert!(second > first);
    }

    #[test]
    fn exit_without_scope_reports_imbalance() {
        let mut table = SymbolTable::new();
        assert!(!table.exit_scope());
    }

    #[test]
    fn parameter_map_slots_are_keyed_by_text() {
        let mut table = SymbolTable::new();
        let a = table.slot("ID1: 5%").unwrap();
        let b = table.slot("ID2: 5%").unwrap();
        assert_ne!(a, b);
        assert_eq!(table.slot("ID1: 5%").unwrap(), a);
        assert_eq!(table.declare("x").unwrap(), 3);
    }

    #[test]
    fn exhausting_the_address_space_fails() {
        let mut table = SymbolTable::new();
        table.next_address = u16::MAX as u32;
        assert_eq!(table.declare("last").unwrap(), u16::MAX);
        assert_eq!(
            table.declare("one_too_many"),
            Err(CompileError::AddressSpaceExhausted)
        );
    }
}
