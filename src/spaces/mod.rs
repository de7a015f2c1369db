//! Typed spaces, their serializable descriptors, and the seedable action sampler.

pub mod sampler;
pub mod space;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::Action;

pub use sampler::ActionSpace;
pub use space::Space;

/// A discrete space of integers in [0, n).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrete {
    n: u32,
}

impl Discrete {
    pub fn new(n: u32) -> Self {
        assert!(n > 0, "Discrete space requires n > 0");
        Self { n }
    }

    pub fn n(&self) -> u32 { self.n }
}

impl Space for Discrete {
    type Element = u32;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        if self.n == 1 { return 0; }
        Uniform::from(0..self.n).sample(rng)
    }

    fn contains(&self, elem: &Self::Element) -> bool { *elem < self.n }

    fn shape(&self) -> Vec<usize> { Vec::new() }
}

/// A fixed-length binary vector space of size `n`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiBinary {
    n: usize,
}

impl MultiBinary {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "MultiBinary requires n > 0");
        Self { n }
    }

    pub fn n(&self) -> usize { self.n }
}

impl Space for MultiBinary {
    type Element = Vec<u32>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        let dist = Uniform::from(0u32..=1u32);
        (0..self.n).map(|_| dist.sample(rng)).collect()
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        elem.len() == self.n && elem.iter().all(|&v| v == 0 || v == 1)
    }

    fn shape(&self) -> Vec<usize> { vec![self.n] }
}

/// A multi-dimensional discrete space with per-dimension sizes nvec[i] (values in [0, nvec[i])).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiDiscrete {
    nvec: Vec<u32>,
}

impl MultiDiscrete {
    pub fn new<I: Into<Vec<u32>>>(nvec: I) -> Self {
        let nvec = nvec.into();
        assert!(!nvec.is_empty(), "MultiDiscrete requires at least one dimension");
        for (i, &n) in nvec.iter().enumerate() {
            assert!(n > 0, "MultiDiscrete nvec[{i}] must be > 0");
        }
        Self { nvec }
    }

    pub fn nvec(&self) -> &[u32] { &self.nvec }
    pub fn ndim(&self) -> usize { self.nvec.len() }
}

impl Space for MultiDiscrete {
    type Element = Vec<u32>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        self.nvec
            .iter()
            .map(|&n| if n == 1 { 0 } else { Uniform::from(0..n).sample(rng) })
            .collect()
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        if elem.len() != self.nvec.len() { return false; }
        elem.iter().zip(self.nvec.iter()).all(|(&v, &n)| v < n)
    }

    fn shape(&self) -> Vec<usize> { vec![self.nvec.len()] }
}

/// A continuous box with per-element inclusive bounds, stored flat in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    low: Vec<f32>,
    high: Vec<f32>,
    shape: Vec<usize>,
}

impl BoxSpace {
    /// A 1-d box from per-dimension bounds.
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Self {
        let shape = vec![low.len()];
        Self::with_shape(low, high, shape)
    }

    /// A box of arbitrary shape; `low`/`high` hold one bound per element.
    pub fn with_shape(low: Vec<f32>, high: Vec<f32>, shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        assert_eq!(low.len(), size, "low has {} elements, shape needs {size}", low.len());
        assert_eq!(high.len(), size, "high has {} elements, shape needs {size}", high.len());
        for i in 0..size {
            assert!(low[i] <= high[i], "low[{i}] > high[{i}]");
        }
        Self { low, high, shape }
    }

    /// A box of the given shape with the same bounds everywhere.
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        let size = shape.iter().product();
        Self::with_shape(vec![low; size], vec![high; size], shape.to_vec())
    }

    pub fn low(&self) -> &[f32] { &self.low }
    pub fn high(&self) -> &[f32] { &self.high }
}

impl Space for BoxSpace {
    type Element = Vec<f32>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&lo, &hi)| {
                // Unbounded (or effectively unbounded) dimensions fall back to [-1, 1].
                if hi - lo < f32::MAX / 2.0 {
                    Uniform::new_inclusive(lo, hi).sample(rng)
                } else {
                    Uniform::new_inclusive(-1.0f32, 1.0).sample(rng)
                }
            })
            .collect()
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        elem.len() == self.low.len()
            && elem
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(v, (lo, hi))| lo <= v && v <= hi)
    }

    fn shape(&self) -> Vec<usize> { self.shape.clone() }
}

/// Serializable descriptor of any supported space: shape, dtype and bounds.
///
/// Workers fetch this from the environment once and cache it; it travels over
/// the wire for out-of-process substrates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SpaceSpec {
    Discrete(Discrete),
    Box(BoxSpace),
    MultiDiscrete(MultiDiscrete),
    MultiBinary(MultiBinary),
}

impl SpaceSpec {
    /// Shape of a single element (empty for scalar spaces).
    pub fn shape(&self) -> Vec<usize> {
        match self {
            SpaceSpec::Discrete(s) => s.shape(),
            SpaceSpec::Box(s) => s.shape(),
            SpaceSpec::MultiDiscrete(s) => s.shape(),
            SpaceSpec::MultiBinary(s) => s.shape(),
        }
    }

    /// Draw an erased action from this space.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        match self {
            SpaceSpec::Discrete(s) => Action::Discrete(s.sample(rng)),
            SpaceSpec::Box(s) => Action::Continuous(s.sample(rng)),
            SpaceSpec::MultiDiscrete(s) => Action::MultiDiscrete(s.sample(rng)),
            SpaceSpec::MultiBinary(s) => Action::MultiDiscrete(s.sample(rng)),
        }
    }

    /// Whether an erased action is a member of this space.
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (SpaceSpec::Discrete(s), Action::Discrete(a)) => s.contains(a),
            (SpaceSpec::Box(s), Action::Continuous(a)) => s.contains(a),
            (SpaceSpec::MultiDiscrete(s), Action::MultiDiscrete(a)) => s.contains(a),
            (SpaceSpec::MultiBinary(s), Action::MultiDiscrete(a)) => s.contains(a),
            _ => false,
        }
    }
}

impl From<Discrete> for SpaceSpec { fn from(s: Discrete) -> Self { SpaceSpec::Discrete(s) } }
impl From<BoxSpace> for SpaceSpec { fn from(s: BoxSpace) -> Self { SpaceSpec::Box(s) } }
impl From<MultiDiscrete> for SpaceSpec { fn from(s: MultiDiscrete) -> Self { SpaceSpec::MultiDiscrete(s) } }
impl From<MultiBinary> for SpaceSpec { fn from(s: MultiBinary) -> Self { SpaceSpec::MultiBinary(s) } }
