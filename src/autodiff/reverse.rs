//! Reverse-mode parameter gradients on burn's autodiff backend.
//!
//! A [`Var`] is a `Copy` handle to a one-element tensor of an
//! `Autodiff<NdArray<f64>>` graph kept in a thread-local arena, so ansatz code
//! written against [`Scalar`] records the graph that burn differentiates.
//! Arithmetic between constants stays in plain `f64` and is never recorded.
//!
//! The parameter vector is a single leaf tensor. Contiguous runs of
//! parameters, such as the rows of a dense layer, enter [`Scalar::dot`] as one
//! slice of that leaf.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Sub};

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Tensor, TensorData};

use super::scalar::Scalar;

/// Backend the parameter gradients are computed on.
pub type Reverse = Autodiff<NdArray<f64>>;

type Node = Tensor<Reverse, 1>;

const CONSTANT: u32 = u32::MAX;

enum Entry {
    /// Element `index` of the parameter leaf, sliced on first use.
    Param { index: usize, slice: Option<Node> },
    Tensor(Node),
}

#[derive(Default)]
struct Arena {
    params: Option<Node>,
    n_params: usize,
    entries: Vec<Entry>,
    /// Zero leaves added to watched values, keyed by the watched handle.
    taps: Vec<(u32, Node)>,
    /// Last stacked operand of `dot`, reused while a layer walks its rows.
    stacked: Option<(Vec<(u32, u64)>, Node)>,
    active: bool,
}

impl Arena {
    fn clear(&mut self) {
        self.params = None;
        self.n_params = 0;
        self.entries.clear();
        self.taps.clear();
        self.stacked = None;
    }

    fn node(&mut self, id: u32) -> Node {
        let Arena { params, entries, .. } = self;
        match &mut entries[id as usize] {
            Entry::Tensor(node) => node.clone(),
            Entry::Param { index, slice } => match (slice, params) {
                (Some(node), _) => node.clone(),
                (slot, Some(leaf)) => slot.insert(leaf.clone().slice(*index..*index + 1)).clone(),
                (None, None) => Tensor::zeros([1], &device()),
            },
        }
    }

    fn push(&mut self, node: Node) -> u32 {
        debug_assert!(self.active, "var used outside of a TapeSession");
        self.entries.push(Entry::Tensor(node));
        (self.entries.len() - 1) as u32
    }

    /// All of `xs` as one tensor, or `None` when every element is constant.
    fn stack(&mut self, xs: &[Var]) -> Option<Node> {
        if xs.iter().all(|x| x.node == CONSTANT) {
            return None;
        }
        let first = xs[0].node as usize;
        let contiguous = first + xs.len() <= self.n_params
            && xs.iter().enumerate().all(|(i, x)| x.node as usize == first + i);
        if let (true, Some(leaf)) = (contiguous, &self.params) {
            return Some(leaf.clone().slice(first..first + xs.len()));
        }

        let key: Vec<(u32, u64)> = xs.iter().map(|x| (x.node, x.value.to_bits())).collect();
        if let Some((cached, node)) = &self.stacked {
            if *cached == key {
                return Some(node.clone());
            }
        }
        let parts: Vec<Node> = xs
            .iter()
            .map(|x| if x.node == CONSTANT { constant_tensor(&[x.value]) } else { self.node(x.node) })
            .collect();
        let node = Tensor::cat(parts, 0);
        self.stacked = Some((key, node.clone()));
        Some(node)
    }
}

thread_local! {
    static ARENA: RefCell<Arena> = RefCell::new(Arena::default());
}

fn with_arena<T>(f: impl FnOnce(&mut Arena) -> T) -> T {
    ARENA.with(|cell| f(&mut cell.borrow_mut()))
}

fn device() -> NdArrayDevice {
    NdArrayDevice::default()
}

fn constant_tensor(values: &[f64]) -> Node {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), &device())
}

fn first_value(tensor: Tensor<NdArray<f64>, 1>) -> f64 {
    tensor.into_data().iter::<f64>().next().unwrap_or(0.0)
}

/// Guard that owns the thread-local arena.
pub struct TapeSession {
    _private: (),
}

impl TapeSession {
    pub fn new() -> Self {
        with_arena(|arena| {
            assert!(!arena.active, "nested tape sessions are not supported");
            arena.clear();
            arena.active = true;
        });
        Self { _private: () }
    }

    /// The leaves gradients are taken with respect to. Call once, before any
    /// other operation of the session.
    pub fn variables(&self, values: &[f64]) -> Vec<Var> {
        with_arena(|arena| {
            debug_assert!(arena.entries.is_empty(), "variables must be created first");
            if !values.is_empty() {
                arena.params = Some(constant_tensor(values).require_grad());
            }
            arena.n_params = values.len();
            values
                .iter()
                .enumerate()
                .map(|(index, &value)| {
                    arena.entries.push(Entry::Param { index, slice: None });
                    Var { value, node: index as u32 }
                })
                .collect()
        })
    }

    /// Number of recorded handles.
    pub fn len(&self) -> usize {
        with_arena(|arena| arena.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TapeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TapeSession {
    fn drop(&mut self) {
        with_arena(|arena| {
            arena.clear();
            arena.active = false;
        });
    }
}

/// Derivatives of one output with respect to the parameters and to every
/// [watched](Var::watch) value.
#[derive(Clone, Debug)]
pub struct Adjoints {
    params: Vec<f64>,
    watched: HashMap<u32, f64>,
}

impl Adjoints {
    /// Adjoint of `v`; zero for constants and for unwatched intermediates.
    pub fn of(&self, v: Var) -> f64 {
        match self.params.get(v.node as usize) {
            Some(&adjoint) => adjoint,
            None => self.watched.get(&v.node).copied().unwrap_or(0.0),
        }
    }

    pub fn of_all(&self, vars: &[Var]) -> Vec<f64> {
        vars.iter().map(|&v| self.of(v)).collect()
    }
}

/// A value recorded in the reverse-mode graph.
#[derive(Clone, Copy, Debug)]
pub struct Var {
    value: f64,
    node: u32,
}

impl Var {
    fn unary(self, value: f64, op: impl FnOnce(Node) -> Node) -> Var {
        if self.node == CONSTANT {
            return Var::constant(value);
        }
        with_arena(|arena| {
            let node = op(arena.node(self.node));
            Var { value, node: arena.push(node) }
        })
    }

    fn binary(
        self,
        rhs: Var,
        value: f64,
        both: impl FnOnce(Node, Node) -> Node,
        left: impl FnOnce(Node, f64) -> Node,
        right: impl FnOnce(f64, Node) -> Node,
    ) -> Var {
        match (self.node == CONSTANT, rhs.node == CONSTANT) {
            (true, true) => Var::constant(value),
            (false, true) => self.unary(value, |a| left(a, rhs.value)),
            (true, false) => rhs.unary(value, |b| right(self.value, b)),
            (false, false) => with_arena(|arena| {
                let node = both(arena.node(self.node), arena.node(rhs.node));
                Var { value, node: arena.push(node) }
            }),
        }
    }

    /// The same value with its adjoint recorded by [`Var::backward`].
    pub fn watch(self) -> Var {
        if self.node == CONSTANT {
            return self;
        }
        with_arena(|arena| {
            let tap = Tensor::<Reverse, 1>::zeros([1], &device()).require_grad();
            let node = arena.node(self.node) + tap.clone();
            let id = arena.push(node);
            arena.taps.push((id, tap));
            Var { value: self.value, node: id }
        })
    }

    /// Back-propagate from `self`.
    pub fn backward(&self) -> Adjoints {
        with_arena(|arena| {
            let mut adjoints = Adjoints { params: vec![0.0; arena.n_params], watched: HashMap::new() };
            if self.node == CONSTANT {
                return adjoints;
            }
            let grads = arena.node(self.node).backward();
            if let Some(grad) = arena.params.as_ref().and_then(|leaf| leaf.grad(&grads)) {
                adjoints.params = grad.into_data().iter::<f64>().collect();
            }
            adjoints.watched = arena
                .taps
                .iter()
                .map(|(id, tap)| (*id, tap.grad(&grads).map_or(0.0, first_value)))
                .collect();
            adjoints
        })
    }
}

impl Scalar for Var {
    fn constant(value: f64) -> Self {
        Var { value, node: CONSTANT }
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn exp(self) -> Self {
        self.unary(self.value.exp(), Node::exp)
    }

    fn ln(self) -> Self {
        self.unary(self.value.ln(), Node::log)
    }

    fn sqrt(self) -> Self {
        self.unary(self.value.sqrt(), Node::sqrt)
    }

    fn recip(self) -> Self {
        self.unary(self.value.recip(), Node::recip)
    }

    fn dot(a: &[Self], b: &[Self]) -> Self {
        debug_assert_eq!(a.len(), b.len());
        let value: f64 = a.iter().zip(b).map(|(x, y)| x.value * y.value).sum();
        with_arena(|arena| {
            let node = match (arena.stack(a), arena.stack(b)) {
                (None, None) => return Var::constant(value),
                (Some(x), Some(y)) => (x * y).sum(),
                (Some(x), None) => (x * constant_tensor(&values(b))).sum(),
                (None, Some(y)) => (constant_tensor(&values(a)) * y).sum(),
            };
            Var { value, node: arena.push(node) }
        })
    }

    fn sum(xs: &[Self]) -> Self {
        let value = xs.iter().map(|x| x.value).sum();
        with_arena(|arena| match arena.stack(xs) {
            Some(x) => Var { value, node: arena.push(x.sum()) },
            None => Var::constant(value),
        })
    }
}

fn values(xs: &[Var]) -> Vec<f64> {
    xs.iter().map(|x| x.value).collect()
}

impl Add for Var {
    type Output = Var;
    fn add(self, rhs: Var) -> Var {
        self.binary(rhs, self.value + rhs.value, |a, b| a + b, Node::add_scalar, |a, b| b.add_scalar(a))
    }
}

impl Sub for Var {
    type Output = Var;
    fn sub(self, rhs: Var) -> Var {
        self.binary(
            rhs,
            self.value - rhs.value,
            |a, b| a - b,
            Node::sub_scalar,
            |a, b| b.neg().add_scalar(a),
        )
    }
}

impl Mul for Var {
    type Output = Var;
    fn mul(self, rhs: Var) -> Var {
        self.binary(rhs, self.value * rhs.value, |a, b| a * b, Node::mul_scalar, |a, b| b.mul_scalar(a))
    }
}

impl Div for Var {
    type Output = Var;
    fn div(self, rhs: Var) -> Var {
        self.binary(
            rhs,
            self.value / rhs.value,
            |a, b| a / b,
            Node::div_scalar,
            |a, b| b.recip().mul_scalar(a),
        )
    }
}

impl Neg for Var {
    type Output = Var;
    fn neg(self) -> Var {
        self.unary(-self.value, Node::neg)
    }
}

impl Add<f64> for Var {
    type Output = Var;
    fn add(self, rhs: f64) -> Var {
        self.unary(self.value + rhs, |a| a.add_scalar(rhs))
    }
}

impl Sub<f64> for Var {
    type Output = Var;
    fn sub(self, rhs: f64) -> Var {
        self.unary(self.value - rhs, |a| a.sub_scalar(rhs))
    }
}

impl Mul<f64> for Var {
    type Output = Var;
    fn mul(self, rhs: f64) -> Var {
        self.unary(self.value * rhs, |a| a.mul_scalar(rhs))
    }
}

impl Div<f64> for Var {
    type Output = Var;
    fn div(self, rhs: f64) -> Var {
        self.unary(self.value / rhs, |a| a.div_scalar(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gradient_of_product_and_exp() {
        let tape = TapeSession::new();
        let v = tape.variables(&[0.5, -1.2]);
        let (x, y) = (v[0], v[1]);
        // f = x·y + exp(x) − 1/y
        let f = x * y + x.exp() - y.recip();
        let adj = f.backward();
        assert_relative_eq!(f.value(), -0.6 + 0.5_f64.exp() + 1.0 / 1.2, epsilon = 1e-14);
        assert_relative_eq!(adj.of(x), -1.2 + 0.5_f64.exp(), epsilon = 1e-14);
        assert_relative_eq!(adj.of(y), 0.5 + 1.0 / 1.44, epsilon = 1e-14);
    }

    #[test]
    fn test_dot_and_sum_gradients() {
        let tape = TapeSession::new();
        let w = tape.variables(&[1.0, 2.0, 3.0]);
        let x = [Var::constant(0.1), Var::constant(0.2), Var::constant(0.3)];
        let out = Var::dot(&w, &x).watch();
        let total = Var::sum(&[out, w[0]]);
        let adj = total.backward();
        assert_relative_eq!(total.value(), 2.4, epsilon = 1e-14);
        assert_relative_eq!(adj.of(w[0]), 1.1, epsilon = 1e-14);
        assert_relative_eq!(adj.of(w[1]), 0.2, epsilon = 1e-14);
        assert_relative_eq!(adj.of(w[2]), 0.3, epsilon = 1e-14);
        assert_relative_eq!(adj.of(out), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_dot_of_mixed_operands() {
        // rows of a 2×2 layer applied to an input that depends on the weights
        let tape = TapeSession::new();
        let w = tape.variables(&[0.5, -1.0, 2.0, 0.25]);
        let input = [w[0] * w[0], Var::constant(1.0)];
        let y0 = Var::dot(&w[0..2], &input);
        let y1 = Var::dot(&w[2..4], &input);
        let adj = (y0 * y1).backward();
        // y0 = w0³ + w1, y1 = w2 w0² + w3
        let (y0v, y1v) = (0.125 - 1.0, 2.0 * 0.25 + 0.25);
        assert_relative_eq!(adj.of(w[0]), 3.0 * 0.25 * y1v + y0v * 2.0 * 2.0 * 0.5, epsilon = 1e-13);
        assert_relative_eq!(adj.of(w[1]), y1v, epsilon = 1e-13);
        assert_relative_eq!(adj.of(w[2]), y0v * 0.25, epsilon = 1e-13);
        assert_relative_eq!(adj.of(w[3]), y0v, epsilon = 1e-13);
    }

    #[test]
    fn test_watched_value_has_its_own_adjoint() {
        let tape = TapeSession::new();
        let x = tape.variables(&[2.0])[0];
        let shifted = (x + 1.0).watch();
        let f = shifted * 3.0 + x * x;
        let adj = f.backward();
        assert_relative_eq!(adj.of(shifted), 3.0, epsilon = 1e-14);
        assert_relative_eq!(adj.of(x), 3.0 + 4.0, epsilon = 1e-14);
    }

    #[test]
    fn test_constants_are_not_recorded() {
        let tape = TapeSession::new();
        let c = Var::constant(2.0) * Var::constant(3.0) - Var::constant(1.0).exp();
        assert_relative_eq!(c.value(), 6.0 - 1.0_f64.exp());
        assert!(tape.is_empty());
        assert_eq!(c.backward().of(c), 0.0);
    }
}
