//! Formula variables and their indexing categories
//!
//! A variable is a named operand with a fixed feature dimension and one of
//! three roles:
//!
//! | Category | Indexed by | Extent |
//! |----------|------------|--------|
//! | [`Category::Vi`] | target index `i` | `M` |
//! | [`Category::Vj`] | source index `j` | `N` |
//! | [`Category::Pm`] | nothing (global) | `1` |
//!
//! Variables are bound to operand buffers positionally, in declaration order.

use crate::error::FormulaError;
use std::fmt;

/// Indexing category of a formula variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Target-indexed ("i") variable
    Vi,
    /// Source-indexed ("j") variable
    Vj,
    /// Global parameter broadcast to every pair
    Pm,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Vi => write!(f, "Vi"),
            Category::Vj => write!(f, "Vj"),
            Category::Pm => write!(f, "Pm"),
        }
    }
}

/// A declared formula variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: String,
    category: Category,
    dim: usize,
    position: usize,
}

impl Variable {
    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indexing category
    pub fn category(&self) -> Category {
        self.category
    }

    /// Feature dimension (columns of the operand buffer)
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Position in the operand list
    pub fn position(&self) -> usize {
        self.position
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}({})", self.name, self.category, self.dim)
    }
}

/// Ordered table of declared variables
///
/// Declaration order defines operand positions. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VarTable {
    vars: Vec<Variable>,
}

impl VarTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new variable and return its position
    pub fn declare(
        &mut self,
        name: &str,
        category: Category,
        dim: usize,
    ) -> Result<usize, FormulaError> {
        if !is_identifier(name) {
            return Err(FormulaError::InvalidName { name: name.into() });
        }
        self.declare_unchecked_name(name, category, dim)
    }

    /// Declare a variable whose name was generated by the engine itself
    ///
    /// Engine-generated names start with `@` and can never collide with user
    /// declarations, which must be plain identifiers.
    pub fn declare_internal(
        &mut self,
        name: &str,
        category: Category,
        dim: usize,
    ) -> Result<usize, FormulaError> {
        if !name.starts_with('@') || !is_identifier(&name[1..]) {
            return Err(FormulaError::InvalidName { name: name.into() });
        }
        self.declare_unchecked_name(name, category, dim)
    }

    fn declare_unchecked_name(
        &mut self,
        name: &str,
        category: Category,
        dim: usize,
    ) -> Result<usize, FormulaError> {
        if dim == 0 {
            return Err(FormulaError::InvalidDimension {
                name: name.into(),
                dim,
            });
        }
        if self.lookup(name).is_some() {
            return Err(FormulaError::DuplicateVariable { name: name.into() });
        }

        let position = self.vars.len();
        self.vars.push(Variable {
            name: name.into(),
            category,
            dim,
            position,
        });
        Ok(position)
    }

    /// Find a variable by name
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Variable at an operand position
    pub fn get(&self, position: usize) -> Option<&Variable> {
        self.vars.get(position)
    }

    /// Number of declared variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variable is declared
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over variables in operand order
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    /// Iterate over variables of one category
    pub fn of_category(&self, category: Category) -> impl Iterator<Item = &Variable> {
        self.vars.iter().filter(move |v| v.category == category)
    }
}

impl fmt::Display for VarTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, var) in self.vars.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", var)?;
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_assigns_positions() {
        let mut table = VarTable::new();
        assert_eq!(table.declare("X", Category::Vi, 3).unwrap(), 0);
        assert_eq!(table.declare("Y", Category::Vj, 3).unwrap(), 1);
        assert_eq!(table.declare("G", Category::Pm, 1).unwrap(), 2);

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup("Y").unwrap().category(), Category::Vj);
        assert_eq!(table.get(2).unwrap().name(), "G");
        assert_eq!(table.of_category(Category::Vi).count(), 1);
        assert_eq!(table.to_string(), "X=Vi(3),Y=Vj(3),G=Pm(1)");
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut table = VarTable::new();
        table.declare("X", Category::Vi, 1).unwrap();
        let err = table.declare("X", Category::Vj, 1).unwrap_err();
        assert_eq!(err, FormulaError::DuplicateVariable { name: "X".into() });
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut table = VarTable::new();
        assert!(matches!(
            table.declare("X", Category::Vi, 0),
            Err(FormulaError::InvalidDimension { dim: 0, .. })
        ));
    }

    #[test]
    fn test_names_validated() {
        let mut table = VarTable::new();
        assert!(table.declare("x_1", Category::Vi, 1).is_ok());
        assert!(table.declare("1x", Category::Vi, 1).is_err());
        assert!(table.declare("@grad", Category::Vi, 1).is_err());
        assert!(table.declare_internal("@grad", Category::Vi, 1).is_ok());
        assert!(table.declare_internal("grad", Category::Vi, 1).is_err());
    }
}
