//! Integration hooks for external AD frameworks
//!
//! A host framework records genred reductions on its tape and calls back into
//! the symbolic backward pass when gradients flow in. The pieces are:
//!
//! - [`AdOperation`]: a differentiable operation with owned inputs
//! - [`GenredOp`]: the [`AdOperation`] for one [`Genred`] call
//! - [`AdContext`]: what a tape offers to operations
//! - [`RecordingTape`]: a minimal tape that accumulates input gradients per
//!   operation, usable on its own or as a reference for adapters
//!
//! # Example
//!
//! ```
//! use genred_ad::hooks::{AdContext, GenredOp, RecordingTape};
//! use genred_core::expr::var;
//! use genred_core::FormulaBuilder;
//! use genred_exec::{Axis, Genred, ReductionOp};
//! use scirs2_core::ndarray_ext::array;
//!
//! let formula = FormulaBuilder::new()
//!     .vi("X", 1)
//!     .vj("Y", 1)
//!     .build(&(var("X") * var("Y")))
//!     .unwrap();
//! let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
//!
//! let mut tape = RecordingTape::<f64>::new();
//! let op = GenredOp::new(genred, vec![array![[2.0]], array![[1.0], [3.0]]]).unwrap();
//! let id = tape.register_operation(Box::new(op)).unwrap();
//!
//! tape.backward(id, &[array![[1.0]]]).unwrap();
//! assert_eq!(tape.get_gradient(id, 0).unwrap(), &array![[4.0]]);
//! assert_eq!(tape.get_gradient(id, 1).unwrap(), &array![[2.0], [2.0]]);
//! ```

use crate::grad::GradientPlan;
use anyhow::{anyhow, bail, Result};
use genred_core::Scalar;
use genred_exec::Genred;
use scirs2_core::ndarray_ext::{Array2, ArrayView2};
use std::collections::HashMap;
use std::fmt::Debug;

/// Unique identifier for operations on a tape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub u64);

/// Trait for differentiable operations
pub trait AdOperation<T: Scalar>: Debug {
    /// Execute the forward pass
    fn forward(&self) -> Result<Vec<Array2<T>>>;

    /// Execute the backward pass
    ///
    /// # Arguments
    ///
    /// * `output_grads` - Gradients w.r.t. outputs (∂L/∂output)
    ///
    /// # Returns
    ///
    /// Gradients w.r.t. inputs (∂L/∂input), one per input
    fn backward(&self, output_grads: &[Array2<T>]) -> Result<Vec<Array2<T>>>;

    /// Name for diagnostics
    fn name(&self) -> &str;

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;
}

/// Trait for tape management
pub trait AdContext<T: Scalar> {
    /// Record an operation; `None` while recording is paused
    fn register_operation(&mut self, op: Box<dyn AdOperation<T>>) -> Option<OperationId>;

    /// Run the backward pass of one operation and accumulate its input gradients
    fn backward(&mut self, op_id: OperationId, output_grads: &[Array2<T>]) -> Result<()>;

    /// Drop all operations and gradients
    fn clear(&mut self);

    /// Accumulated gradient of input `input` of operation `op_id`
    fn get_gradient(&self, op_id: OperationId, input: usize) -> Option<&Array2<T>>;
}

/// One [`Genred`] call with its operands, as a differentiable operation
///
/// Inputs are the operands in declaration order. Backward passes build one
/// [`GradientPlan`] per input; inputs the formula ignores get zero gradients.
#[derive(Debug, Clone)]
pub struct GenredOp<T: Scalar> {
    genred: Genred,
    inputs: Vec<Array2<T>>,
    name: String,
}

impl<T: Scalar> GenredOp<T> {
    /// Bind operands to a reduction, validating their shapes
    pub fn new(genred: Genred, inputs: Vec<Array2<T>>) -> Result<Self> {
        genred.extents(&views(&inputs))?;
        let name = format!("genred[{}]", genred.reduction());
        Ok(Self {
            genred,
            inputs,
            name,
        })
    }

    pub fn genred(&self) -> &Genred {
        &self.genred
    }

    pub fn inputs(&self) -> &[Array2<T>] {
        &self.inputs
    }
}

impl<T: Scalar> AdOperation<T> for GenredOp<T> {
    fn forward(&self) -> Result<Vec<Array2<T>>> {
        Ok(vec![self.genred.evaluate(&views(&self.inputs))?])
    }

    fn backward(&self, output_grads: &[Array2<T>]) -> Result<Vec<Array2<T>>> {
        let [cotangent] = output_grads else {
            bail!(
                "{} has one output, got {} output gradients",
                self.name,
                output_grads.len()
            );
        };

        let args = views(&self.inputs);
        let extents = self.genred.extents(&args)?;
        self.genred
            .formula()
            .vars()
            .iter()
            .map(|var| -> Result<Array2<T>> {
                let plan = GradientPlan::new(&self.genred, var.name())?;
                Ok(plan.evaluate_with_extents(&args, cotangent.view(), extents)?)
            })
            .collect()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn num_outputs(&self) -> usize {
        1
    }
}

fn views<T: Scalar>(arrays: &[Array2<T>]) -> Vec<ArrayView2<'_, T>> {
    arrays.iter().map(|a| a.view()).collect()
}

/// Tape that records operations and accumulates input gradients by operation
pub struct RecordingTape<T: Scalar> {
    operations: Vec<(OperationId, Box<dyn AdOperation<T>>)>,
    gradients: HashMap<(OperationId, usize), Array2<T>>,
    next_op_id: u64,
    recording: bool,
}

impl<T: Scalar> RecordingTape<T> {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            gradients: HashMap::new(),
            next_op_id: 0,
            recording: true,
        }
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    /// Forward outputs of a recorded operation
    pub fn forward(&self, op_id: OperationId) -> Result<Vec<Array2<T>>> {
        self.operation(op_id)?.forward()
    }

    fn operation(&self, op_id: OperationId) -> Result<&dyn AdOperation<T>> {
        self.operations
            .iter()
            .find(|(id, _)| *id == op_id)
            .map(|(_, op)| op.as_ref())
            .ok_or_else(|| anyhow!("operation {:?} is not on the tape", op_id))
    }
}

impl<T: Scalar> Default for RecordingTape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Debug for RecordingTape<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTape")
            .field(
                "operations",
                &self
                    .operations
                    .iter()
                    .map(|(id, op)| (id.0, op.name()))
                    .collect::<Vec<_>>(),
            )
            .field("gradients", &self.gradients.len())
            .field("recording", &self.recording)
            .finish()
    }
}

impl<T: Scalar> AdContext<T> for RecordingTape<T> {
    fn register_operation(&mut self, op: Box<dyn AdOperation<T>>) -> Option<OperationId> {
        if !self.recording {
            return None;
        }
        let op_id = OperationId(self.next_op_id);
        self.next_op_id += 1;
        log::debug!("recorded {} as operation {}", op.name(), op_id.0);
        self.operations.push((op_id, op));
        Some(op_id)
    }

    fn backward(&mut self, op_id: OperationId, output_grads: &[Array2<T>]) -> Result<()> {
        let op = self.operation(op_id)?;
        let input_grads = op.backward(output_grads)?;
        if input_grads.len() != op.num_inputs() {
            bail!(
                "{} returned {} input gradients for {} inputs",
                op.name(),
                input_grads.len(),
                op.num_inputs()
            );
        }

        for (input, grad) in input_grads.into_iter().enumerate() {
            match self.gradients.get_mut(&(op_id, input)) {
                Some(acc) if acc.dim() != grad.dim() => bail!(
                    "gradient of input {} changed shape from {:?} to {:?}",
                    input,
                    acc.dim(),
                    grad.dim()
                ),
                Some(acc) => acc.zip_mut_with(&grad, |a, &g| *a = *a + g),
                None => {
                    self.gradients.insert((op_id, input), grad);
                }
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.operations.clear();
        self.gradients.clear();
        self.next_op_id = 0;
    }

    fn get_gradient(&self, op_id: OperationId, input: usize) -> Option<&Array2<T>> {
        self.gradients.get(&(op_id, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genred_core::expr::{sqdist, var};
    use genred_core::{kernel_product, FormulaBuilder, KernelKind};
    use genred_exec::{Axis, ReductionOp};
    use scirs2_core::ndarray_ext::array;

    fn product_op() -> GenredOp<f64> {
        let formula = FormulaBuilder::new()
            .vi("X", 1)
            .vj("Y", 1)
            .vj("B", 1)
            .build(&(var("X") * var("Y")))
            .unwrap();
        let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
        GenredOp::new(
            genred,
            vec![array![[1.0], [2.0]], array![[3.0], [4.0]], array![[0.0], [0.0]]],
        )
        .unwrap()
    }

    #[test]
    fn test_tape_recording_switch() {
        let mut tape = RecordingTape::<f64>::new();
        assert!(tape.is_recording());

        tape.stop_recording();
        assert!(tape.register_operation(Box::new(product_op())).is_none());
        assert_eq!(tape.num_operations(), 0);

        tape.start_recording();
        assert!(tape.register_operation(Box::new(product_op())).is_some());
        assert_eq!(tape.num_operations(), 1);
    }

    #[test]
    fn test_backward_accumulates() {
        let mut tape = RecordingTape::new();
        let id = tape.register_operation(Box::new(product_op())).unwrap();
        let g = array![[1.0], [1.0]];

        tape.backward(id, &[g.clone()]).unwrap();
        assert_eq!(tape.get_gradient(id, 0).unwrap(), &array![[7.0], [7.0]]);
        assert_eq!(tape.get_gradient(id, 1).unwrap(), &array![[3.0], [3.0]]);
        // B is unused: zero gradient of its shape
        assert_eq!(tape.get_gradient(id, 2).unwrap(), &Array2::<f64>::zeros((2, 1)));

        tape.backward(id, &[g]).unwrap();
        assert_eq!(tape.get_gradient(id, 0).unwrap(), &array![[14.0], [14.0]]);
    }

    #[test]
    fn test_backward_rejects_wrong_output_count() {
        let op = product_op();
        assert!(op.backward(&[]).is_err());
        let g = array![[1.0], [1.0]];
        assert!(op.backward(&[g.clone(), g]).is_err());
    }

    #[test]
    fn test_unknown_operation() {
        let mut tape = RecordingTape::<f64>::new();
        assert!(tape.backward(OperationId(7), &[array![[1.0]]]).is_err());
        assert!(tape.forward(OperationId(7)).is_err());
    }

    #[test]
    fn test_operand_shapes_validated() {
        let formula = FormulaBuilder::new()
            .vi("X", 2)
            .vj("Y", 2)
            .build(&sqdist(var("X"), var("Y")))
            .unwrap();
        let genred = Genred::new(formula, ReductionOp::Sum, Axis::OverJ).unwrap();
        assert!(GenredOp::new(genred, vec![Array2::<f64>::zeros((3, 2)), Array2::zeros((3, 1))]).is_err());
    }

    #[test]
    fn test_kernel_op_metadata_and_forward() {
        let genred = Genred::new(
            kernel_product(KernelKind::Gaussian, 1, 1).unwrap(),
            ReductionOp::Sum,
            Axis::OverJ,
        )
        .unwrap();
        let op = GenredOp::new(
            genred,
            vec![array![[0.0]], array![[0.0], [0.0]], array![[1.0], [2.0]], array![[1.0]]],
        )
        .unwrap();
        assert_eq!(op.num_inputs(), 4);
        assert_eq!(op.num_outputs(), 1);
        assert_eq!(op.name(), "genred[Sum(axis=1)]");

        let mut tape = RecordingTape::new();
        let id = tape.register_operation(Box::new(op)).unwrap();
        assert_eq!(tape.forward(id).unwrap(), vec![array![[3.0]]]);

        tape.clear();
        assert_eq!(tape.num_operations(), 0);
        assert!(tape.get_gradient(id, 0).is_none());
    }
}
