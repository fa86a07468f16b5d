use std::iter::zip;

use itertools::Itertools;
use rand::Rng;
use tracing::debug;

use crate::engine::*;
use crate::error::{GradError, Result};

pub trait Module {
    fn zero_grad(&self) {
        self.parameters().iter().for_each(|v| v.reset_grad())
    }

    /// Plain gradient descent: `p -= p.grad * rate` for every parameter.
    fn step(&self, rate: ValueType) {
        self.parameters().iter().for_each(|p| p.descend(rate))
    }

    fn parameters(&self) -> Vec<Value>;
}

/// Nonlinearity applied on top of a neuron's weighted sum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    #[default]
    ReLU,
    Logistic,
    Linear,
}

impl Activation {
    fn apply(&self, sum: Value) -> Value {
        match self {
            Activation::ReLU => sum.relu(),
            Activation::Logistic => sum.logistic(),
            Activation::Linear => sum,
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::ReLU => f.write_str("ReLU"),
            Activation::Logistic => f.write_str("Logistic"),
            Activation::Linear => f.write_str("Linear"),
        }
    }
}

pub struct Neuron {
    value: Value,
    w: Vec<Value>,
    b: Value,
    activation: Activation,
}

impl Neuron {
    /// Wires a neuron to every neuron of `prev`.
    ///
    /// With an empty `prev` this is an input neuron whose value is a leaf
    /// placeholder set through [`Value::set_data`].
    pub fn new<R: Rng + ?Sized>(rng: &mut R, prev: &[Neuron], activation: Activation) -> Self {
        let w: Vec<Value> = prev.iter().map(|_| Value::new(rng.gen())).collect();
        let b = Value::new(rng.gen());

        let sum = zip(prev, &w)
            .map(|(n, wi)| n.value.clone() * wi.clone())
            .reduce(|v1, v2| v1 + v2);

        let value = match sum {
            Some(sum) => activation.apply(sum + b.clone()),
            None => Value::new(0.),
        };

        Self {
            value,
            w,
            b,
            activation,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn weights(&self) -> &[Value] {
        &self.w
    }

    pub fn bias(&self) -> &Value {
        &self.b
    }

    pub fn is_input(&self) -> bool {
        self.w.is_empty()
    }
}

impl Module for Neuron {
    fn parameters(&self) -> Vec<Value> {
        let mut params = self.w.clone();
        params.push(self.b.clone());

        params
    }
}

impl std::fmt::Display for Neuron {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_input() {
            return f.write_str("InputNeuron");
        }

        f.write_fmt(format_args!("{}Neuron({})", self.activation, self.w.len()))
    }
}

pub struct Layer {
    neurons: Vec<Neuron>,
}

impl Layer {
    /// Dense layer of `size` neurons, each consuming every neuron of `prev`.
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        size: usize,
        prev: &[Neuron],
        activation: Activation,
    ) -> Result<Self> {
        if size < 1 {
            return Err(GradError::degenerate("a layer needs at least one neuron"));
        }

        let neurons = (0..size)
            .map(|_| Neuron::new(rng, prev, activation))
            .collect();

        Ok(Self { neurons })
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// Number of neurons. Never zero: construction rejects empty layers.
    pub fn len(&self) -> usize {
        self.neurons.len()
    }
}

impl Module for Layer {
    fn parameters(&self) -> Vec<Value> {
        self.neurons.iter().flat_map(|x| x.parameters()).collect()
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Layer of [{}]", self.neurons.iter().join(", ")))
    }
}

/// Multi-layer perceptron with a built-in squared-error loss.
///
/// The whole graph, loss included, is assembled once at construction. A
/// training step only rewrites leaves and reruns the graph traversals:
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use scalargrad::nn::{Mlp, Module};
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let mlp = Mlp::new(&mut rng, 2, &[4], 1).unwrap();
///
/// mlp.set_input(&[0.5, 0.25]).unwrap();
/// mlp.set_expected(&[0.75]).unwrap();
/// mlp.loss().forward();
/// mlp.loss().zero_grad();
/// mlp.loss().backward();
/// mlp.step(0.01);
///
/// assert!(mlp.loss().data() >= 0.);
/// ```
pub struct Mlp {
    input: Layer,
    hidden: Vec<Layer>,
    output: Layer,
    expected: Vec<Value>,
    loss: Value,
}

impl Mlp {
    /// Network with ReLU on every hidden and output neuron.
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        n_inputs: usize,
        hidden: &[usize],
        n_outputs: usize,
    ) -> Result<Self> {
        Self::with_activation(rng, n_inputs, hidden, n_outputs, Activation::ReLU)
    }

    pub fn with_activation<R: Rng + ?Sized>(
        rng: &mut R,
        n_inputs: usize,
        hidden: &[usize],
        n_outputs: usize,
        activation: Activation,
    ) -> Result<Self> {
        if n_inputs < 1 {
            return Err(GradError::degenerate("a network needs at least one input"));
        }
        if n_outputs < 1 {
            return Err(GradError::degenerate("a network needs at least one output"));
        }

        let input = Layer::new(rng, n_inputs, &[], activation)?;

        let mut hidden_layers: Vec<Layer> = Vec::with_capacity(hidden.len());
        for &size in hidden {
            let prev = hidden_layers.last().unwrap_or(&input);
            let layer = Layer::new(rng, size, prev.neurons(), activation)?;
            hidden_layers.push(layer);
        }

        let prev = hidden_layers.last().unwrap_or(&input);
        let output = Layer::new(rng, n_outputs, prev.neurons(), activation)?;

        let expected: Vec<Value> = (0..n_outputs).map(|_| Value::new(0.)).collect();
        let loss = zip(&expected, output.neurons())
            .map(|(e, n)| (e.clone() - n.value.clone()).pow(2.))
            .reduce(|v1, v2| v1 + v2)
            .ok_or_else(|| GradError::degenerate("a network needs at least one output"))?;

        let mlp = Self {
            input,
            hidden: hidden_layers,
            output,
            expected,
            loss,
        };

        debug!(
            inputs = n_inputs,
            hidden = ?hidden,
            outputs = n_outputs,
            %activation,
            parameters = mlp.parameters().len(),
            "assembled network"
        );

        Ok(mlp)
    }

    pub fn input(&self) -> &Layer {
        &self.input
    }

    pub fn hidden(&self) -> &[Layer] {
        &self.hidden
    }

    pub fn output(&self) -> &Layer {
        &self.output
    }

    pub fn expected(&self) -> &[Value] {
        &self.expected
    }

    /// Sum over outputs of `(expected - output)^2`.
    pub fn loss(&self) -> &Value {
        &self.loss
    }

    /// Current output data, as of the last forward pass.
    pub fn outputs(&self) -> Vec<ValueType> {
        self.output.neurons.iter().map(|n| n.value.data()).collect()
    }

    pub fn set_input(&self, inputs: &[ValueType]) -> Result<()> {
        Self::write_leaves("input", self.input.neurons.iter().map(|n| &n.value), inputs)
    }

    pub fn set_expected(&self, expected: &[ValueType]) -> Result<()> {
        Self::write_leaves("expected", self.expected.iter(), expected)
    }

    fn write_leaves<'a>(
        what: &'static str,
        leaves: impl ExactSizeIterator<Item = &'a Value>,
        data: &[ValueType],
    ) -> Result<()> {
        if leaves.len() != data.len() {
            return Err(GradError::ShapeMismatch {
                what,
                expected: leaves.len(),
                got: data.len(),
            });
        }

        zip(leaves, data).try_for_each(|(leaf, &d)| leaf.set_data(d))
    }

    /// Feeds `inputs` through the network and returns the outputs.
    pub fn predict(&self, inputs: &[ValueType]) -> Result<Vec<ValueType>> {
        self.set_input(inputs)?;
        self.loss.forward();

        Ok(self.outputs())
    }

    /// One full training step: set input and expected, forward, zero,
    /// backward, descend. Returns the loss measured before the update.
    pub fn train_step(
        &self,
        inputs: &[ValueType],
        expected: &[ValueType],
        rate: ValueType,
    ) -> Result<ValueType> {
        self.set_input(inputs)?;
        self.set_expected(expected)?;
        self.loss.forward();
        self.loss.zero_grad();
        self.loss.backward();
        self.step(rate);

        Ok(self.loss.data())
    }
}

impl Module for Mlp {
    /// Weights then bias of every neuron, hidden layers first, then the
    /// output layer. The input layer owns no parameters.
    fn parameters(&self) -> Vec<Value> {
        self.hidden
            .iter()
            .chain(std::iter::once(&self.output))
            .flat_map(|x| x.parameters())
            .collect()
    }
}

impl std::fmt::Display for Mlp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = std::iter::once(&self.input)
            .chain(&self.hidden)
            .chain(std::iter::once(&self.output))
            .join(", ");

        f.write_fmt(format_args!("MLP of [{}]", desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_new_neuron() {
        let mut rng = rng();
        let n1 = Neuron::new(&mut rng, &[], Activation::ReLU);
        let n2 = Neuron::new(&mut rng, &[], Activation::ReLU);

        assert!(n1.is_input());
        assert_eq!(n1.weights().len(), 0);
        assert!(n1.value().is_leaf());
        assert_float_eq!(n1.value().data(), 0.0, abs <= 1e-10);

        let prev = [n1, n2];
        let n3 = Neuron::new(&mut rng, &prev, Activation::ReLU);
        assert_eq!(n3.weights().len(), 2);
        assert_eq!(n3.value().op(), Some(Op::ReLU));
        assert_eq!(n3.to_string(), "ReLUNeuron(2)");
    }

    #[test]
    fn test_neuron_weighted_sum() {
        let mut rng = rng();
        let prev = [
            Neuron::new(&mut rng, &[], Activation::Linear),
            Neuron::new(&mut rng, &[], Activation::Linear),
        ];
        prev[0].value().set_data(2.0).unwrap();
        prev[1].value().set_data(-3.0).unwrap();

        let n = Neuron::new(&mut rng, &prev, Activation::Linear);
        n.value().forward();

        let w = n.weights();
        let expected = 2.0 * w[0].data() - 3.0 * w[1].data() + n.bias().data();
        assert_float_eq!(n.value().data(), expected, abs <= 1e-10);
    }

    #[test]
    fn test_new_layer() {
        let mut rng = rng();
        let l1 = Layer::new(&mut rng, 3, &[], Activation::ReLU).unwrap();
        assert_eq!(l1.len(), 3);
        assert!(l1.neurons().iter().all(|n| n.weights().is_empty()));

        let l2 = Layer::new(&mut rng, 2, l1.neurons(), Activation::ReLU).unwrap();
        assert_eq!(l2.len(), 2);
        assert!(l2.neurons().iter().all(|n| n.weights().len() == 3));
        assert_eq!(l2.parameters().len(), 2 * (3 + 1));
    }

    #[test]
    fn test_empty_layer_is_degenerate() {
        let mut rng = rng();
        assert!(matches!(
            Layer::new(&mut rng, 0, &[], Activation::ReLU),
            Err(GradError::DegenerateTopology { .. })
        ));
    }

    #[test]
    fn test_new_mlp() {
        let mut rng = rng();
        let mlp = Mlp::new(&mut rng, 2, &[4, 5], 3).unwrap();

        assert_eq!(mlp.input().len(), 2);
        assert_eq!(mlp.input().neurons()[0].weights().len(), 0);
        assert_eq!(mlp.hidden()[0].len(), 4);
        assert_eq!(mlp.hidden()[0].neurons()[0].weights().len(), 2);
        assert_eq!(mlp.hidden()[1].len(), 5);
        assert_eq!(mlp.hidden()[1].neurons()[3].weights().len(), 4);
        assert_eq!(mlp.output().len(), 3);
        assert_eq!(mlp.output().neurons()[0].weights().len(), 5);
        assert_eq!(mlp.expected().len(), 3);
        assert_eq!(mlp.parameters().len(), (2 * 4 + 4) + (4 * 5 + 5) + (5 * 3 + 3));
    }

    #[test]
    fn test_degenerate_mlp() {
        let mut rng = rng();
        assert!(Mlp::new(&mut rng, 0, &[2], 1).is_err());
        assert!(Mlp::new(&mut rng, 2, &[2], 0).is_err());
        assert!(matches!(
            Mlp::new(&mut rng, 2, &[3, 0], 1),
            Err(GradError::DegenerateTopology { .. })
        ));
    }

    #[test]
    fn test_parameter_order() {
        let mut rng = rng();
        let mlp = Mlp::new(&mut rng, 2, &[3], 2).unwrap();
        let params = mlp.parameters();

        let first = &mlp.hidden()[0].neurons()[0];
        assert_eq!(params[0], first.weights()[0]);
        assert_eq!(params[1], first.weights()[1]);
        assert_eq!(params[2], *first.bias());

        let last = &mlp.output().neurons()[1];
        assert_eq!(params.last(), Some(last.bias()));
        assert!(params.iter().all(|p| p.is_leaf()));
        assert!(params.iter().all(|p| (0.0..1.0).contains(&p.data())));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut rng = rng();
        let mlp = Mlp::new(&mut rng, 2, &[], 1).unwrap();

        assert_eq!(
            mlp.set_input(&[1.0]),
            Err(GradError::ShapeMismatch {
                what: "input",
                expected: 2,
                got: 1
            })
        );
        assert!(matches!(
            mlp.set_expected(&[1.0, 2.0]),
            Err(GradError::ShapeMismatch { what: "expected", .. })
        ));
        assert!(mlp.set_input(&[1.0, 2.0]).is_ok());
        assert!(mlp.set_expected(&[3.0]).is_ok());
    }

    #[test]
    fn test_loss_is_not_writable() {
        let mut rng = rng();
        let mlp = Mlp::new(&mut rng, 1, &[], 1).unwrap();

        assert!(matches!(
            mlp.loss().set_data(0.0),
            Err(GradError::InvalidMutation { .. })
        ));
    }

    #[test]
    fn test_display() {
        let mut rng = rng();
        let mlp = Mlp::with_activation(&mut rng, 1, &[2], 1, Activation::Logistic).unwrap();

        assert_eq!(
            mlp.to_string(),
            "MLP of [Layer of [InputNeuron], \
             Layer of [LogisticNeuron(1), LogisticNeuron(1)], \
             Layer of [LogisticNeuron(2)]]"
        );
    }
}
