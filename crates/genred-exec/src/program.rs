//! Compilation of formulas into flat slot programs
//!
//! A [`Program`] is the executable form of a formula for one reduction axis.
//! Every distinct node gets a *slot*: a contiguous range of a per-worker
//! scratch buffer sized to the node's feature dimension. Shared subtrees
//! (the same `Arc<Node>`) compile to one slot and are computed once per pair.
//!
//! Scratch layout:
//!
//! ```text
//! [ parameters | constants | outer variables | inner variables | computed nodes ]
//! ```
//!
//! Outer and inner variables are contiguous so a whole operand row (or a
//! packed inner-tile row) lands in scratch with a single copy.
//!
//! Instructions are split by the most variable input they depend on:
//!
//! | Stage | Depends on | Runs |
//! |-------|------------|------|
//! | [`Stage::Invariant`] | parameters, constants | once per worker |
//! | [`Stage::PerOuter`] | outer variables | once per outer row and inner tile |
//! | [`Stage::PerPair`] | inner variables | once per `(i, j)` pair |
//!
//! Hoisting never changes results: each instruction computes the same value
//! from the same inputs whichever stage runs it.

use crate::reduction::Axis;
use genred_core::{
    BinaryOp, Category, Formula, GenredError, GenredResult, Node, NodeKind, Scalar, UnaryOp,
};
use scirs2_core::ndarray_ext::ArrayView2;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// Contiguous scratch range holding one node value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: usize,
    pub dim: usize,
}

impl Slot {
    fn range(self) -> Range<usize> {
        self.offset..self.offset + self.dim
    }

    /// Scratch index of component `k`, broadcasting scalar slots
    #[inline]
    fn at(self, k: usize) -> usize {
        if self.dim == 1 {
            self.offset
        } else {
            self.offset + k
        }
    }
}

/// How often an instruction must be re-executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Invariant,
    PerOuter,
    PerPair,
}

/// Role of a variable during a sweep along a given axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Indexed by output rows
    Outer,
    /// Reduced away
    Inner,
    /// Global parameter
    Param,
}

impl Role {
    /// Role of a variable category when reducing along `axis`
    pub fn of(category: Category, axis: Axis) -> Role {
        if category == Category::Pm {
            Role::Param
        } else if category == axis.outer_category() {
            Role::Outer
        } else {
            Role::Inner
        }
    }

    fn stage(self) -> Stage {
        match self {
            Role::Param => Stage::Invariant,
            Role::Outer => Stage::PerOuter,
            Role::Inner => Stage::PerPair,
        }
    }
}

/// Operand row copied into scratch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Load {
    /// Operand position
    pub position: usize,
    /// Destination slot
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq)]
enum Instr {
    Unary { op: UnaryOp, arg: Slot, out: Slot },
    Binary { op: BinaryOp, lhs: Slot, rhs: Slot, out: Slot },
    SqDist { lhs: Slot, rhs: Slot, out: Slot },
    SqNorm2 { arg: Slot, out: Slot },
    Norm2 { arg: Slot, out: Slot },
    Sum { arg: Slot, out: Slot },
    Elem { arg: Slot, index: usize, out: Slot },
    ElemT { arg: Slot, index: usize, out: Slot },
    Broadcast { arg: Slot, out: Slot },
}

impl Instr {
    #[inline]
    fn run<T: Scalar>(&self, s: &mut [T]) {
        match *self {
            Instr::Unary { op, arg, out } => {
                for k in 0..out.dim {
                    s[out.offset + k] = op.apply(s[arg.offset + k]);
                }
            }
            Instr::Binary { op, lhs, rhs, out } => {
                for k in 0..out.dim {
                    let (a, b) = (s[lhs.at(k)], s[rhs.at(k)]);
                    s[out.offset + k] = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                    };
                }
            }
            Instr::SqDist { lhs, rhs, out } => {
                let mut acc = T::zero();
                for k in 0..lhs.dim {
                    let d = s[lhs.offset + k] - s[rhs.offset + k];
                    acc = acc + d * d;
                }
                s[out.offset] = acc;
            }
            Instr::SqNorm2 { arg, out } => s[out.offset] = sqnorm(&s[arg.range()]),
            Instr::Norm2 { arg, out } => s[out.offset] = sqnorm(&s[arg.range()]).sqrt(),
            Instr::Sum { arg, out } => {
                let mut acc = T::zero();
                for &v in &s[arg.range()] {
                    acc = acc + v;
                }
                s[out.offset] = acc;
            }
            Instr::Elem { arg, index, out } => s[out.offset] = s[arg.offset + index],
            Instr::ElemT { arg, index, out } => {
                let v = s[arg.offset];
                for k in 0..out.dim {
                    s[out.offset + k] = if k == index { v } else { T::zero() };
                }
            }
            Instr::Broadcast { arg, out } => {
                let v = s[arg.offset];
                s[out.range()].iter_mut().for_each(|o| *o = v);
            }
        }
    }
}

#[inline]
fn sqnorm<T: Scalar>(values: &[T]) -> T {
    values.iter().fold(T::zero(), |acc, &v| acc + v * v)
}

/// Executable form of a formula for one reduction axis
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    axis: Axis,
    param_loads: Vec<Load>,
    constants: Vec<(usize, f64)>,
    outer_loads: Vec<Load>,
    inner_loads: Vec<Load>,
    outer_range: Range<usize>,
    inner_range: Range<usize>,
    invariant: Vec<Instr>,
    per_outer: Vec<Instr>,
    per_pair: Vec<Instr>,
    result: Slot,
    scratch_width: usize,
}

impl Program {
    /// Compile `formula` for a sweep along `axis`
    pub fn compile(formula: &Formula, axis: Axis) -> GenredResult<Self> {
        let mut compiler = Compiler::new(formula, axis)?;
        let (result, _) = compiler.visit(formula.root())?;
        let program = compiler.finish(result);

        log::debug!(
            "compiled {} for {}: {} invariant, {} per-outer, {} per-pair instructions, scratch {}",
            formula,
            axis,
            program.invariant.len(),
            program.per_outer.len(),
            program.per_pair.len(),
            program.scratch_width
        );
        Ok(program)
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Feature dimension of the formula value
    pub fn dim(&self) -> usize {
        self.result.dim
    }

    /// Scratch elements needed per worker
    pub fn scratch_width(&self) -> usize {
        self.scratch_width
    }

    /// Elements of one outer operand row, across all outer variables
    pub fn outer_width(&self) -> usize {
        self.outer_range.len()
    }

    /// Elements of one packed inner row, across all inner variables
    pub fn inner_width(&self) -> usize {
        self.inner_range.len()
    }

    /// Operand loads for the given role, in operand order
    pub fn loads(&self, role: Role) -> &[Load] {
        match role {
            Role::Outer => &self.outer_loads,
            Role::Inner => &self.inner_loads,
            Role::Param => &self.param_loads,
        }
    }

    /// Number of instructions executed per pair
    pub fn pair_cost(&self) -> usize {
        self.per_pair.len()
    }

    /// Scratch buffer with parameters, constants and invariant nodes filled in
    ///
    /// `args` must already be validated against the variable table.
    pub fn prepare_scratch<T: Scalar>(&self, args: &[ArrayView2<'_, T>]) -> Vec<T> {
        let mut scratch = vec![T::zero(); self.scratch_width];
        for load in &self.param_loads {
            copy_row(&args[load.position], 0, &mut scratch[load.slot.range()]);
        }
        for &(offset, value) in &self.constants {
            scratch[offset] = T::from_f64_lossy(value);
        }
        for instr in &self.invariant {
            instr.run(&mut scratch);
        }
        scratch
    }

    /// Copy outer row `row` into scratch and run the per-outer instructions
    #[inline]
    pub fn load_outer<T: Scalar>(&self, args: &[ArrayView2<'_, T>], row: usize, scratch: &mut [T]) {
        for load in &self.outer_loads {
            copy_row(&args[load.position], row, &mut scratch[load.slot.range()]);
        }
        for instr in &self.per_outer {
            instr.run(scratch);
        }
    }

    /// Pack inner rows `rows` into `pack`, one `inner_width` run per row
    pub fn pack_inner<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        rows: Range<usize>,
        pack: &mut [T],
    ) {
        let width = self.inner_width();
        if width == 0 {
            return;
        }
        let base = self.inner_range.start;
        for (r, dst) in rows.zip(pack.chunks_exact_mut(width)) {
            for load in &self.inner_loads {
                let at = load.slot.offset - base;
                copy_row(&args[load.position], r, &mut dst[at..at + load.slot.dim]);
            }
        }
    }

    /// Load one packed inner row, run the per-pair instructions and return the value
    #[inline]
    pub fn eval_packed<'s, T: Scalar>(&self, packed: &[T], scratch: &'s mut [T]) -> &'s [T] {
        scratch[self.inner_range.clone()].copy_from_slice(packed);
        for instr in &self.per_pair {
            instr.run(scratch);
        }
        &scratch[self.result.range()]
    }

    /// Formula value for one `(outer, inner)` pair, without tiling
    pub fn eval_pair<T: Scalar>(
        &self,
        args: &[ArrayView2<'_, T>],
        outer: usize,
        inner: usize,
        scratch: &mut [T],
    ) -> Vec<T> {
        self.load_outer(args, outer, scratch);
        let mut packed = vec![T::zero(); self.inner_width()];
        self.pack_inner(args, inner..inner + 1, &mut packed);
        self.eval_packed(&packed, scratch).to_vec()
    }
}

/// Copy operand row `row` into `dst`
#[inline]
pub(crate) fn copy_row<T: Scalar>(view: &ArrayView2<'_, T>, row: usize, dst: &mut [T]) {
    let src = view.row(row);
    match src.as_slice() {
        Some(slice) => dst.copy_from_slice(slice),
        None => dst.iter_mut().zip(src.iter()).for_each(|(d, s)| *d = *s),
    }
}

struct Compiler<'f> {
    formula: &'f Formula,
    axis: Axis,
    var_slots: HashMap<usize, Slot>,
    param_loads: Vec<Load>,
    outer_loads: Vec<Load>,
    inner_loads: Vec<Load>,
    outer_range: Range<usize>,
    inner_range: Range<usize>,
    constants: Vec<(usize, f64)>,
    memo: HashMap<*const Node, (Slot, Stage)>,
    invariant: Vec<Instr>,
    per_outer: Vec<Instr>,
    per_pair: Vec<Instr>,
    next: usize,
}

impl<'f> Compiler<'f> {
    /// Allocate variable slots: parameters first, then outer, then inner
    fn new(formula: &'f Formula, axis: Axis) -> GenredResult<Self> {
        let mut used = Vec::new();
        collect_vars(formula.root(), &mut used);
        used.sort_unstable();
        used.dedup();

        let mut compiler = Self {
            formula,
            axis,
            var_slots: HashMap::new(),
            param_loads: Vec::new(),
            outer_loads: Vec::new(),
            inner_loads: Vec::new(),
            outer_range: 0..0,
            inner_range: 0..0,
            constants: Vec::new(),
            memo: HashMap::new(),
            invariant: Vec::new(),
            per_outer: Vec::new(),
            per_pair: Vec::new(),
            next: 0,
        };

        for role in [Role::Param, Role::Outer, Role::Inner] {
            let start = compiler.next;
            for &position in &used {
                let var = formula.vars().get(position).ok_or_else(|| {
                    GenredError::operation(
                        "compile",
                        format!("variable #{} missing from the table", position),
                    )
                })?;
                if Role::of(var.category(), axis) != role {
                    continue;
                }
                let slot = compiler.alloc(var.dim());
                compiler.var_slots.insert(position, slot);
                let load = Load { position, slot };
                match role {
                    Role::Param => compiler.param_loads.push(load),
                    Role::Outer => compiler.outer_loads.push(load),
                    Role::Inner => compiler.inner_loads.push(load),
                }
            }
            match role {
                Role::Outer => compiler.outer_range = start..compiler.next,
                Role::Inner => compiler.inner_range = start..compiler.next,
                Role::Param => {}
            }
        }
        Ok(compiler)
    }

    fn alloc(&mut self, dim: usize) -> Slot {
        let slot = Slot {
            offset: self.next,
            dim,
        };
        self.next += dim;
        slot
    }

    fn emit(&mut self, stage: Stage, instr: Instr) {
        match stage {
            Stage::Invariant => self.invariant.push(instr),
            Stage::PerOuter => self.per_outer.push(instr),
            Stage::PerPair => self.per_pair.push(instr),
        }
    }

    fn visit(&mut self, node: &Arc<Node>) -> GenredResult<(Slot, Stage)> {
        let key = Arc::as_ptr(node);
        if let Some(&hit) = self.memo.get(&key) {
            return Ok(hit);
        }

        let compiled = match node.kind() {
            NodeKind::Var { position, category } => {
                let slot = *self.var_slots.get(position).ok_or_else(|| {
                    GenredError::operation(
                        "compile",
                        format!("no slot for variable #{}", position),
                    )
                })?;
                (slot, Role::of(*category, self.axis).stage())
            }
            NodeKind::Const(value) => {
                let slot = self.alloc(1);
                self.constants.push((slot.offset, *value));
                (slot, Stage::Invariant)
            }
            NodeKind::Unary(op, a) => {
                let (arg, stage) = self.visit(a)?;
                let out = self.alloc(node.dim());
                self.emit(stage, Instr::Unary { op: *op, arg, out });
                (out, stage)
            }
            NodeKind::Binary(op, a, b) => {
                let (lhs, sa) = self.visit(a)?;
                let (rhs, sb) = self.visit(b)?;
                let stage = sa.max(sb);
                let out = self.alloc(node.dim());
                self.emit(
                    stage,
                    Instr::Binary {
                        op: *op,
                        lhs,
                        rhs,
                        out,
                    },
                );
                (out, stage)
            }
            NodeKind::SqDist(a, b) => {
                let (lhs, sa) = self.visit(a)?;
                let (rhs, sb) = self.visit(b)?;
                let stage = sa.max(sb);
                let out = self.alloc(1);
                self.emit(stage, Instr::SqDist { lhs, rhs, out });
                (out, stage)
            }
            NodeKind::SqNorm2(a) => self.reduce_like(a, |arg, out| Instr::SqNorm2 { arg, out })?,
            NodeKind::Norm2(a) => self.reduce_like(a, |arg, out| Instr::Norm2 { arg, out })?,
            NodeKind::Sum(a) => self.reduce_like(a, |arg, out| Instr::Sum { arg, out })?,
            NodeKind::Elem(a, index) => {
                let index = *index;
                self.reduce_like(a, move |arg, out| Instr::Elem { arg, index, out })?
            }
            NodeKind::ElemT(a, index) => {
                let (arg, stage) = self.visit(a)?;
                let out = self.alloc(node.dim());
                self.emit(
                    stage,
                    Instr::ElemT {
                        arg,
                        index: *index,
                        out,
                    },
                );
                (out, stage)
            }
            NodeKind::Broadcast(a) => {
                let (arg, stage) = self.visit(a)?;
                let out = self.alloc(node.dim());
                self.emit(stage, Instr::Broadcast { arg, out });
                (out, stage)
            }
        };

        self.memo.insert(key, compiled);
        Ok(compiled)
    }

    /// Nodes producing a scalar from one child
    fn reduce_like(
        &mut self,
        child: &Arc<Node>,
        make: impl FnOnce(Slot, Slot) -> Instr,
    ) -> GenredResult<(Slot, Stage)> {
        let (arg, stage) = self.visit(child)?;
        let out = self.alloc(1);
        self.emit(stage, make(arg, out));
        Ok((out, stage))
    }

    fn finish(self, result: Slot) -> Program {
        debug_assert_eq!(result.dim, self.formula.dim());
        Program {
            axis: self.axis,
            param_loads: self.param_loads,
            constants: self.constants,
            outer_loads: self.outer_loads,
            inner_loads: self.inner_loads,
            outer_range: self.outer_range,
            inner_range: self.inner_range,
            invariant: self.invariant,
            per_outer: self.per_outer,
            per_pair: self.per_pair,
            result,
            scratch_width: self.next,
        }
    }
}

fn collect_vars(node: &Node, out: &mut Vec<usize>) {
    if let NodeKind::Var { position, .. } = node.kind() {
        out.push(*position);
    }
    for child in node.children() {
        collect_vars(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genred_core::expr::{cst, sqdist, var};
    use genred_core::FormulaBuilder;
    use scirs2_core::ndarray_ext::array;

    fn gaussian() -> Formula {
        let expr = (-(var("G") * sqdist(var("X"), var("Y")))).exp() * var("B");
        FormulaBuilder::new()
            .vi("X", 2)
            .vj("Y", 2)
            .vj("B", 1)
            .pm("G", 1)
            .build(&expr)
            .unwrap()
    }

    #[test]
    fn test_roles_follow_axis() {
        assert_eq!(Role::of(Category::Vi, Axis::OverJ), Role::Outer);
        assert_eq!(Role::of(Category::Vj, Axis::OverJ), Role::Inner);
        assert_eq!(Role::of(Category::Vi, Axis::OverI), Role::Inner);
        assert_eq!(Role::of(Category::Pm, Axis::OverI), Role::Param);
    }

    #[test]
    fn test_layout_and_stages() {
        let program = Program::compile(&gaussian(), Axis::OverJ).unwrap();
        assert_eq!(program.dim(), 1);
        assert_eq!(program.outer_width(), 2);
        assert_eq!(program.inner_width(), 3);
        assert_eq!(program.loads(Role::Param).len(), 1);
        assert_eq!(program.loads(Role::Inner).len(), 2);
        // SqDist, Mul, Neg, Exp, Mul all depend on Y or B
        assert_eq!(program.pair_cost(), 5);

        let transposed = Program::compile(&gaussian(), Axis::OverI).unwrap();
        assert_eq!(transposed.outer_width(), 3);
        assert_eq!(transposed.inner_width(), 2);
    }

    #[test]
    fn test_invariant_subexpressions_hoisted() {
        let expr = (var("G") * cst(2.0)).exp() * var("X");
        let formula = FormulaBuilder::new()
            .vi("X", 1)
            .pm("G", 1)
            .build(&expr)
            .unwrap();
        let program = Program::compile(&formula, Axis::OverJ).unwrap();
        assert_eq!(program.pair_cost(), 0);
    }

    #[test]
    fn test_shared_nodes_compiled_once() {
        let vars = {
            let mut t = genred_core::VarTable::new();
            t.declare("X", Category::Vi, 1).unwrap();
            t.declare("Y", Category::Vj, 1).unwrap();
            Arc::new(t)
        };
        let x = Node::var(&vars, 0).unwrap();
        let y = Node::var(&vars, 1).unwrap();
        let d = Node::sqdist(x, y).unwrap();
        let root = Node::binary(BinaryOp::Mul, d.clone(), d).unwrap();
        let formula = Formula::new(root, vars).unwrap();

        let program = Program::compile(&formula, Axis::OverJ).unwrap();
        assert_eq!(program.pair_cost(), 2);
    }

    #[test]
    fn test_eval_pair_matches_hand_computation() {
        let formula = gaussian();
        let program = Program::compile(&formula, Axis::OverJ).unwrap();

        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let y = array![[1.0, 0.0]];
        let b = array![[3.0]];
        let g = array![[0.5]];
        let args = [x.view(), y.view(), b.view(), g.view()];

        let mut scratch = program.prepare_scratch(&args);
        let value = program.eval_pair(&args, 1, 0, &mut scratch);
        let expected = (-(0.5f64 * 1.0)).exp() * 3.0;
        assert_eq!(value, vec![expected]);
    }
}
