//! Validated formula trees
//!
//! A [`Formula`] is an immutable tree of [`Node`]s over a [`VarTable`]. Every
//! node carries its feature dimension, computed when the node is created; the
//! smart constructors on [`Node`] are the only way to build nodes, so an
//! ill-dimensioned tree cannot exist.
//!
//! Subtrees are shared through `Arc`, which lets the gradient rewriter reuse
//! forward subexpressions without copying them. Evaluation deduplicates shared
//! nodes by identity.
//!
//! # Broadcasting
//!
//! Binary elementwise operations accept either two operands of equal
//! dimension, or one operand of dimension 1 that is broadcast against the
//! other. No other broadcasting exists.

use crate::error::FormulaError;
use crate::scalar::Scalar;
use crate::var::{Category, VarTable};
use std::fmt;
use std::sync::Arc;

/// Elementwise unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    /// `1 / sqrt(x)`
    Rsqrt,
    /// `1 / x`
    Inv,
    Square,
    Abs,
    /// `-1`, `0` or `1`
    Sign,
    Sin,
    Cos,
    /// Integer power
    Pow(i32),
}

impl UnaryOp {
    /// Formula-language name
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "Minus",
            UnaryOp::Exp => "Exp",
            UnaryOp::Log => "Log",
            UnaryOp::Sqrt => "Sqrt",
            UnaryOp::Rsqrt => "Rsqrt",
            UnaryOp::Inv => "Inv",
            UnaryOp::Square => "Square",
            UnaryOp::Abs => "Abs",
            UnaryOp::Sign => "Sign",
            UnaryOp::Sin => "Sin",
            UnaryOp::Cos => "Cos",
            UnaryOp::Pow(_) => "Pow",
        }
    }

    /// Apply the operator to one value
    ///
    /// `Rsqrt(0)` is `0` rather than `+inf`, so `Sqrt` and `Norm2` have a zero
    /// derivative at the origin instead of `inf · 0`.
    #[inline]
    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Rsqrt => {
                if x == T::zero() {
                    T::zero()
                } else {
                    x.sqrt().recip()
                }
            }
            UnaryOp::Inv => x.recip(),
            UnaryOp::Square => x * x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sign => {
                if x > T::zero() {
                    T::one()
                } else if x < T::zero() {
                    -T::one()
                } else {
                    T::zero()
                }
            }
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Pow(n) => x.powi(n),
        }
    }
}

/// Elementwise binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Infix symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// Operator name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Subtract",
            BinaryOp::Mul => "Mult",
            BinaryOp::Div => "Divide",
        }
    }
}

/// Node variants
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Reference to the variable at `position`
    Var { position: usize, category: Category },
    /// Scalar literal (dimension 1)
    Const(f64),
    Unary(UnaryOp, Arc<Node>),
    Binary(BinaryOp, Arc<Node>, Arc<Node>),
    /// `Σ_k (a_k - b_k)²`
    SqDist(Arc<Node>, Arc<Node>),
    /// `Σ_k a_k²`
    SqNorm2(Arc<Node>),
    /// `sqrt(Σ_k a_k²)`
    Norm2(Arc<Node>),
    /// `Σ_k a_k`
    Sum(Arc<Node>),
    /// Component `k` of a vector
    Elem(Arc<Node>, usize),
    /// Scalar placed at component `k` of an otherwise-zero vector
    ElemT(Arc<Node>, usize),
    /// Scalar repeated across the node dimension
    Broadcast(Arc<Node>),
}

/// A formula node with its feature dimension
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    dim: usize,
}

impl Node {
    /// Variant of this node
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Feature dimension of this node's value
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Reference to a declared variable
    pub fn var(vars: &VarTable, position: usize) -> Result<Arc<Node>, FormulaError> {
        let var = vars.get(position).ok_or(FormulaError::InvalidReference {
            position,
            reason: format!("table holds {} variables", vars.len()),
        })?;
        Ok(Arc::new(Node {
            kind: NodeKind::Var {
                position,
                category: var.category(),
            },
            dim: var.dim(),
        }))
    }

    /// Scalar literal
    pub fn constant(value: f64) -> Arc<Node> {
        Arc::new(Node {
            kind: NodeKind::Const(value),
            dim: 1,
        })
    }

    /// Elementwise unary operation
    pub fn unary(op: UnaryOp, arg: Arc<Node>) -> Arc<Node> {
        let dim = arg.dim;
        Arc::new(Node {
            kind: NodeKind::Unary(op, arg),
            dim,
        })
    }

    /// Elementwise binary operation with scalar broadcasting
    pub fn binary(
        op: BinaryOp,
        lhs: Arc<Node>,
        rhs: Arc<Node>,
    ) -> Result<Arc<Node>, FormulaError> {
        let dim = broadcast_dim(op.name(), lhs.dim, rhs.dim)?;
        Ok(Arc::new(Node {
            kind: NodeKind::Binary(op, lhs, rhs),
            dim,
        }))
    }

    /// Squared Euclidean distance between two equally sized vectors
    pub fn sqdist(a: Arc<Node>, b: Arc<Node>) -> Result<Arc<Node>, FormulaError> {
        if a.dim != b.dim {
            return Err(FormulaError::DimensionMismatch {
                operation: "SqDist".into(),
                lhs: a.dim,
                rhs: b.dim,
            });
        }
        Ok(Arc::new(Node {
            kind: NodeKind::SqDist(a, b),
            dim: 1,
        }))
    }

    /// Squared Euclidean norm
    pub fn sqnorm2(a: Arc<Node>) -> Arc<Node> {
        Arc::new(Node {
            kind: NodeKind::SqNorm2(a),
            dim: 1,
        })
    }

    /// Euclidean norm
    pub fn norm2(a: Arc<Node>) -> Arc<Node> {
        Arc::new(Node {
            kind: NodeKind::Norm2(a),
            dim: 1,
        })
    }

    /// Sum over feature components
    pub fn sum(a: Arc<Node>) -> Arc<Node> {
        Arc::new(Node {
            kind: NodeKind::Sum(a),
            dim: 1,
        })
    }

    /// Extract component `index`
    pub fn elem(a: Arc<Node>, index: usize) -> Result<Arc<Node>, FormulaError> {
        if index >= a.dim {
            return Err(FormulaError::IndexOutOfRange {
                operation: "Elem".into(),
                index,
                dim: a.dim,
            });
        }
        Ok(Arc::new(Node {
            kind: NodeKind::Elem(a, index),
            dim: 1,
        }))
    }

    /// Embed a scalar at component `index` of a zero vector of size `dim`
    pub fn elem_t(a: Arc<Node>, index: usize, dim: usize) -> Result<Arc<Node>, FormulaError> {
        if a.dim != 1 {
            return Err(FormulaError::DimensionMismatch {
                operation: "ElemT".into(),
                lhs: a.dim,
                rhs: 1,
            });
        }
        if index >= dim {
            return Err(FormulaError::IndexOutOfRange {
                operation: "ElemT".into(),
                index,
                dim,
            });
        }
        Ok(Arc::new(Node {
            kind: NodeKind::ElemT(a, index),
            dim,
        }))
    }

    /// Repeat a scalar `dim` times; identity when `a` already has that dimension
    pub fn broadcast(a: Arc<Node>, dim: usize) -> Result<Arc<Node>, FormulaError> {
        if a.dim == dim {
            return Ok(a);
        }
        if a.dim != 1 || dim == 0 {
            return Err(FormulaError::DimensionMismatch {
                operation: "Broadcast".into(),
                lhs: a.dim,
                rhs: dim,
            });
        }
        Ok(Arc::new(Node {
            kind: NodeKind::Broadcast(a),
            dim,
        }))
    }

    /// Direct children of this node
    pub fn children(&self) -> Vec<&Arc<Node>> {
        match &self.kind {
            NodeKind::Var { .. } | NodeKind::Const(_) => vec![],
            NodeKind::Unary(_, a)
            | NodeKind::SqNorm2(a)
            | NodeKind::Norm2(a)
            | NodeKind::Sum(a)
            | NodeKind::Elem(a, _)
            | NodeKind::ElemT(a, _)
            | NodeKind::Broadcast(a) => vec![a],
            NodeKind::Binary(_, a, b) | NodeKind::SqDist(a, b) => vec![a, b],
        }
    }

    /// Number of references to the variable at `position` in this subtree
    pub fn occurrences(&self, position: usize) -> usize {
        match &self.kind {
            NodeKind::Var { position: p, .. } => usize::from(*p == position),
            _ => self
                .children()
                .into_iter()
                .map(|c| c.occurrences(position))
                .sum(),
        }
    }

    /// Whether the subtree references the variable at `position`
    pub fn depends_on(&self, position: usize) -> bool {
        match &self.kind {
            NodeKind::Var { position: p, .. } => *p == position,
            _ => self.children().into_iter().any(|c| c.depends_on(position)),
        }
    }

    /// Whether the subtree references any variable of `category`
    pub fn uses_category(&self, category: Category) -> bool {
        match &self.kind {
            NodeKind::Var { category: c, .. } => *c == category,
            _ => self
                .children()
                .into_iter()
                .any(|c| c.uses_category(category)),
        }
    }

    fn write_with(&self, vars: &VarTable, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Var { position, .. } => match vars.get(*position) {
                Some(v) => write!(f, "{}", v.name()),
                None => write!(f, "#{}", position),
            },
            NodeKind::Const(c) => write!(f, "{:?}", c),
            NodeKind::Unary(UnaryOp::Pow(n), a) => {
                write!(f, "Pow(")?;
                a.write_with(vars, f)?;
                write!(f, ",{})", n)
            }
            NodeKind::Unary(op, a) => {
                write!(f, "{}(", op.name())?;
                a.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::Binary(op, a, b) => {
                write!(f, "(")?;
                a.write_with(vars, f)?;
                write!(f, "{}", op.symbol())?;
                b.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::SqDist(a, b) => {
                write!(f, "SqDist(")?;
                a.write_with(vars, f)?;
                write!(f, ",")?;
                b.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::SqNorm2(a) => {
                write!(f, "SqNorm2(")?;
                a.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::Norm2(a) => {
                write!(f, "Norm2(")?;
                a.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::Sum(a) => {
                write!(f, "Sum(")?;
                a.write_with(vars, f)?;
                write!(f, ")")
            }
            NodeKind::Elem(a, k) => {
                write!(f, "Elem(")?;
                a.write_with(vars, f)?;
                write!(f, ",{})", k)
            }
            NodeKind::ElemT(a, k) => {
                write!(f, "ElemT(")?;
                a.write_with(vars, f)?;
                write!(f, ",{},{})", k, self.dim)
            }
            NodeKind::Broadcast(a) => {
                write!(f, "Broadcast(")?;
                a.write_with(vars, f)?;
                write!(f, ",{})", self.dim)
            }
        }
    }
}

fn broadcast_dim(operation: &str, lhs: usize, rhs: usize) -> Result<usize, FormulaError> {
    if lhs == rhs || rhs == 1 {
        Ok(lhs)
    } else if lhs == 1 {
        Ok(rhs)
    } else {
        Err(FormulaError::DimensionMismatch {
            operation: operation.into(),
            lhs,
            rhs,
        })
    }
}

/// A validated formula bound to its variable table
///
/// Cloning is cheap: the tree and the table are reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    root: Arc<Node>,
    vars: Arc<VarTable>,
    linear: Option<usize>,
}

impl Formula {
    /// Assemble a formula from a node tree and the table it refers to
    ///
    /// Every variable reference is checked against the table (position,
    /// category and dimension must agree).
    pub fn new(root: Arc<Node>, vars: Arc<VarTable>) -> Result<Self, FormulaError> {
        check_references(&root, &vars)?;
        Ok(Self {
            root,
            vars,
            linear: None,
        })
    }

    /// Designate the variable the formula is linear in
    ///
    /// Fails unless the variable occurs exactly once, in a linear position.
    pub fn with_linear_variable(mut self, name: &str) -> Result<Self, FormulaError> {
        let position = crate::linearity::check_linear(&self, name)?;
        self.linear = Some(position);
        Ok(self)
    }

    /// Root node
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Variable table
    pub fn vars(&self) -> &Arc<VarTable> {
        &self.vars
    }

    /// Feature dimension of the formula value
    pub fn dim(&self) -> usize {
        self.root.dim()
    }

    /// Position of the validated linear variable, if any
    pub fn linear_variable(&self) -> Option<usize> {
        self.linear
    }

    /// Position of a variable by name
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.vars.lookup(name).map(|v| v.position())
    }

    /// Whether the formula references the named variable
    pub fn depends_on(&self, name: &str) -> bool {
        self.position_of(name)
            .map(|p| self.root.depends_on(p))
            .unwrap_or(false)
    }

    /// Content signature: declarations plus the expression
    ///
    /// Two formulas with equal signatures evaluate identically, which makes the
    /// signature usable as a cache key.
    pub fn signature(&self) -> String {
        format!("{}|{}", self.vars, self)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.write_with(&self.vars, f)
    }
}

fn check_references(node: &Node, vars: &VarTable) -> Result<(), FormulaError> {
    if let NodeKind::Var { position, category } = node.kind() {
        let var = vars.get(*position).ok_or(FormulaError::InvalidReference {
            position: *position,
            reason: format!("table holds {} variables", vars.len()),
        })?;
        if var.category() != *category || var.dim() != node.dim() {
            return Err(FormulaError::InvalidReference {
                position: *position,
                reason: format!(
                    "node is {}({}) but '{}' is declared {}({})",
                    category,
                    node.dim(),
                    var.name(),
                    var.category(),
                    var.dim()
                ),
            });
        }
        return Ok(());
    }
    for child in node.children() {
        check_references(child, vars)?;
    }
    Ok(())
}
