use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::trace;

use crate::error::{GradError, Result};

pub type ValueId = usize;

pub type ValueType = f64;

/// Operation that derived a value from its operands.
///
/// Each variant knows how to recompute the value from the current operand
/// data and how to push the output gradient back into the operands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow(ValueType),
    ReLU,
    Logistic,
}

impl Op {
    fn forward(&self, args: &[Value]) -> ValueType {
        match *self {
            Op::Add => args[0].data() + args[1].data(),
            Op::Sub => args[0].data() - args[1].data(),
            Op::Mul => args[0].data() * args[1].data(),
            Op::Div => args[0].data() / args[1].data(),
            Op::Pow(exp) => args[0].data().powf(exp),
            Op::ReLU => {
                let x = args[0].data();
                if x > 0. {
                    x
                } else {
                    0.
                }
            }
            Op::Logistic => 1. / (1. + (-args[0].data()).exp()),
        }
    }

    fn backward(&self, args: &[Value], out_data: ValueType, out_grad: ValueType) {
        match *self {
            Op::Add => {
                args[0].update_grad(out_grad);
                args[1].update_grad(out_grad);
            }
            Op::Sub => {
                args[0].update_grad(out_grad);
                args[1].update_grad(-out_grad);
            }
            Op::Mul => {
                args[0].update_grad(args[1].data() * out_grad);
                args[1].update_grad(args[0].data() * out_grad);
            }
            Op::Div => {
                let (a, b) = (args[0].data(), args[1].data());
                args[0].update_grad(out_grad / b);
                args[1].update_grad(-a / (b * b) * out_grad);
            }
            Op::Pow(exp) => {
                args[0].update_grad(exp * args[0].data().powf(exp - 1.) * out_grad);
            }
            Op::ReLU => {
                // sub-gradient at 0 is 0
                let delta = if args[0].data() > 0. { out_grad } else { 0. };
                args[0].update_grad(delta);
            }
            Op::Logistic => {
                args[0].update_grad(out_data * (1. - out_data) * out_grad);
            }
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Op::Add => fmt.write_str("+"),
            Op::Sub => fmt.write_str("-"),
            Op::Mul => fmt.write_str("*"),
            Op::Div => fmt.write_str("/"),
            Op::Pow(exp) => fmt.write_fmt(format_args!("^{}", exp)),
            Op::ReLU => fmt.write_str("ReLU"),
            Op::Logistic => fmt.write_str("Logistic"),
        }
    }
}

struct Node {
    id: ValueId,
    data: RefCell<ValueType>,
    grad: RefCell<ValueType>,
    op: Option<Op>,
    op_args: Vec<Value>,
}

impl Drop for Node {
    // Unlink uniquely owned operands one at a time; the default recursive
    // drop would use one stack frame per level of graph depth.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.op_args);
        while let Some(value) = pending.pop() {
            if let Ok(mut node) = Rc::try_unwrap(value.0) {
                pending.append(&mut node.op_args);
            }
        }
    }
}

/// Scalar value backed by an autograd engine.
///
/// Cloning is cheap and yields a handle to the same graph node, so a value can
/// feed any number of consumers. Two handles are equal when they refer to the
/// same node.
#[derive(Clone)]
pub struct Value(Rc<Node>);

impl Value {
    pub fn new(data: ValueType) -> Self {
        Self(Rc::new(Node {
            id: super::get_id(),
            data: RefCell::new(data),
            grad: RefCell::new(0.),
            op: None,
            op_args: vec![],
        }))
    }

    fn from_op(op: Op, op_args: Vec<Value>) -> Self {
        let data = op.forward(&op_args);
        Self(Rc::new(Node {
            id: super::get_id(),
            data: RefCell::new(data),
            grad: RefCell::new(0.),
            op: Some(op),
            op_args,
        }))
    }

    pub fn id(&self) -> ValueId {
        self.0.id
    }

    pub fn data(&self) -> ValueType {
        *self.0.data.borrow()
    }

    pub fn grad(&self) -> ValueType {
        *self.0.grad.borrow()
    }

    pub fn op(&self) -> Option<Op> {
        self.0.op
    }

    /// Operation name, empty for leaves.
    pub fn tag(&self) -> String {
        self.op().map(|op| op.to_string()).unwrap_or_default()
    }

    pub fn operands(&self) -> &[Value] {
        &self.0.op_args
    }

    pub fn is_leaf(&self) -> bool {
        self.0.op_args.is_empty()
    }

    /// Overwrites the data of a leaf.
    ///
    /// Derived values are rejected: their data is owned by [`Value::forward`].
    pub fn set_data(&self, data: ValueType) -> Result<()> {
        match self.0.op {
            Some(op) => Err(GradError::InvalidMutation {
                id: self.id(),
                op: op.to_string(),
            }),
            None => {
                *self.0.data.borrow_mut() = data;
                Ok(())
            }
        }
    }

    /// Gradient descent update. Only ever called on parameters, which are leaves.
    pub(crate) fn descend(&self, rate: ValueType) {
        let delta = self.grad() * rate;
        *self.0.data.borrow_mut() -= delta;
    }

    pub fn reset_grad(&self) {
        *self.0.grad.borrow_mut() = Default::default()
    }

    pub fn relu(&self) -> Value {
        Value::from_op(Op::ReLU, vec![self.clone()])
    }

    pub fn logistic(&self) -> Value {
        Value::from_op(Op::Logistic, vec![self.clone()])
    }

    pub fn pow(&self, exp: ValueType) -> Value {
        Value::from_op(Op::Pow(exp), vec![self.clone()])
    }

    /// Recomputes every reachable value from the current leaf data, operands
    /// before their consumers, each node exactly once.
    pub fn forward(&self) {
        let topo = self.build_topology();
        trace!(root = self.id(), nodes = topo.len(), "forward pass");
        for node in topo.iter() {
            if let Some(op) = node.0.op {
                let data = op.forward(&node.0.op_args);
                *node.0.data.borrow_mut() = data;
            }
        }
    }

    /// Backpropagates from this value. Gradients accumulate, so call
    /// [`Value::zero_grad`] first when the graph was already backpropagated.
    pub fn backward(&self) {
        *self.0.grad.borrow_mut() = 1.0;
        let topo = self.build_topology();
        trace!(root = self.id(), nodes = topo.len(), "backward pass");
        for node in topo.iter().rev() {
            if let Some(op) = node.0.op {
                op.backward(&node.0.op_args, node.data(), node.grad());
            }
        }
    }

    /// Resets the gradient of this value and of everything reachable from it.
    pub fn zero_grad(&self) {
        for node in self.build_topology() {
            node.reset_grad();
        }
    }

    /// Reachable nodes in post-order: every operand precedes its consumers.
    ///
    /// Iterative, so graph depth is bounded by memory rather than stack.
    pub fn build_topology(&self) -> Vec<Value> {
        let mut topo = vec![];
        let mut visited = HashSet::<ValueId>::new();
        // (node, operands already pushed)
        let mut stack = vec![(self.clone(), false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                topo.push(node);
            } else if visited.insert(node.id()) {
                stack.push((node.clone(), true));
                for child in node.operands().iter().rev() {
                    if !visited.contains(&child.id()) {
                        stack.push((child.clone(), false));
                    }
                }
            }
        }

        topo
    }

    fn update_grad(&self, delta: ValueType) {
        *self.0.grad.borrow_mut() += delta;
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Value")
            .field("id", &self.id())
            .field("data", &self.data())
            .field("grad", &self.grad())
            .field("op", &self.op())
            .field("operands", &self.operands().iter().map(Value::id).collect::<Vec<_>>())
            .finish()
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let args = self.operands();
        match (self.op(), args.len()) {
            (None, _) => {
                fmt.write_fmt(format_args!(
                    "Value({:.06}, grad={:.06})",
                    self.data(),
                    self.grad()
                ))?;
            }
            (Some(op), 1) => {
                fmt.write_fmt(format_args!(
                    "{} [Value({:.06}, grad={:.06})]",
                    op,
                    args[0].data(),
                    args[0].grad(),
                ))?;
            }
            (Some(op), _) => {
                fmt.write_fmt(format_args!(
                    "[Value({:.06}, grad={:.06})] {} [Value({:.06}, grad={:.06})]",
                    args[0].data(),
                    args[0].grad(),
                    op,
                    args[1].data(),
                    args[1].grad(),
                ))?;
            }
        }
        Ok(())
    }
}

impl std::ops::Add for Value {
    type Output = Value;

    fn add(self, rhs: Value) -> Self::Output {
        Value::from_op(Op::Add, vec![self, rhs])
    }
}

impl std::ops::Add<Value> for ValueType {
    type Output = Value;

    fn add(self, rhs: Value) -> Self::Output {
        Value::new(self) + rhs
    }
}

impl std::ops::Add<ValueType> for Value {
    type Output = Value;

    fn add(self, rhs: ValueType) -> Self::Output {
        self + Value::new(rhs)
    }
}

impl std::ops::Sub for Value {
    type Output = Value;

    fn sub(self, rhs: Value) -> Self::Output {
        Value::from_op(Op::Sub, vec![self, rhs])
    }
}

impl std::ops::Sub<Value> for ValueType {
    type Output = Value;

    fn sub(self, rhs: Value) -> Self::Output {
        Value::new(self) - rhs
    }
}

impl std::ops::Sub<ValueType> for Value {
    type Output = Value;

    fn sub(self, rhs: ValueType) -> Self::Output {
        self - Value::new(rhs)
    }
}

impl std::ops::Mul for Value {
    type Output = Value;

    fn mul(self, rhs: Value) -> Self::Output {
        Value::from_op(Op::Mul, vec![self, rhs])
    }
}

impl std::ops::Mul<Value> for ValueType {
    type Output = Value;

    fn mul(self, rhs: Value) -> Self::Output {
        Value::new(self) * rhs
    }
}

impl std::ops::Mul<ValueType> for Value {
    type Output = Value;

    fn mul(self, rhs: ValueType) -> Self::Output {
        self * Value::new(rhs)
    }
}

impl std::ops::Neg for Value {
    type Output = Value;

    fn neg(self) -> Self::Output {
        Value::new(-1.0) * self
    }
}

impl std::ops::Div for Value {
    type Output = Value;

    fn div(self, rhs: Value) -> Self::Output {
        Value::from_op(Op::Div, vec![self, rhs])
    }
}

impl std::ops::Div<Value> for ValueType {
    type Output = Value;

    fn div(self, rhs: Value) -> Self::Output {
        Value::new(self) / rhs
    }
}

impl std::ops::Div<ValueType> for Value {
    type Output = Value;

    fn div(self, rhs: ValueType) -> Self::Output {
        self / Value::new(rhs)
    }
}

/// Graphviz rendering of a computation graph. Reads data and grad, never writes.
pub mod viz {
    use super::*;
    use itertools::Itertools;

    pub fn render_dot(root: &Value) -> String {
        let mut nodes_str = String::new();
        let mut edges_str = String::new();

        for node in root.build_topology().into_iter().sorted_by_key(Value::id) {
            let id_str = format!("{:08}", node.id());
            nodes_str += &format!(
                "    \"{}\" [label=\"{{ data {:.06} | grad {:.06} }}\" shape=record]\n",
                id_str,
                node.data(),
                node.grad(),
            );
            if let Some(op) = node.op() {
                let op_str = format!("{}{}", id_str, op);
                nodes_str += &format!("    \"{}\" [label=\"{}\"]\n", op_str, op);
                edges_str += &format!("    \"{}\" -> \"{}\"\n", op_str, id_str);
                for child in node.operands().iter().unique() {
                    edges_str += &format!("    \"{:08}\" -> \"{}\"\n", child.id(), op_str);
                }
            }
        }

        format!(
            "strict digraph {{\n    graph [rankdir=LR]\n\n{}{}}}",
            nodes_str, edges_str
        )
    }
}
