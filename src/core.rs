// Core traits and types shared by environments, workers and vector pools.

use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::spaces::SpaceSpec;

/// A single environment's observation, in the numeric form used for batching.
pub type Observation = ArrayD<f32>;

/// A small ordered info map, serializable so it can cross worker boundaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    entries: Vec<(String, InfoValue)>,
}

impl Info {
    /// Create an empty Info map.
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Insert or replace a key with the given value.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: InfoValue) {
        let k = key.into();
        if let Some((_, v)) = self.entries.iter_mut().find(|(kk, _)| kk == &k) {
            *v = value;
        } else {
            self.entries.push((k, value));
        }
    }

    /// Get a reference to a value by key.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of entries.
    pub fn len(&self) -> usize { self.entries.len() }
}

/// Scalar values carried by info maps and by attribute get/set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InfoValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl InfoValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            InfoValue::I64(v) => Some(*v as f64),
            InfoValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            InfoValue::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for InfoValue { fn from(v: bool) -> Self { InfoValue::Bool(v) } }
impl From<i64> for InfoValue { fn from(v: i64) -> Self { InfoValue::I64(v) } }
impl From<i32> for InfoValue { fn from(v: i32) -> Self { InfoValue::I64(v as i64) } }
impl From<u32> for InfoValue { fn from(v: u32) -> Self { InfoValue::I64(v as i64) } }
impl From<usize> for InfoValue { fn from(v: usize) -> Self { InfoValue::I64(v as i64) } }
impl From<f64> for InfoValue { fn from(v: f64) -> Self { InfoValue::F64(v) } }
impl From<f32> for InfoValue { fn from(v: f32) -> Self { InfoValue::F64(v as f64) } }
impl From<&str> for InfoValue { fn from(v: &str) -> Self { InfoValue::Str(v.to_string()) } }
impl From<String> for InfoValue { fn from(v: String) -> Self { InfoValue::Str(v) } }

/// A frame returned by `Env::render`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RenderFrame {
    /// Textual representation of a frame (e.g., ASCII art or debug string).
    Text(String),
    /// Raw pixel buffer in row-major RGB or RGBA format.
    Pixels {
        width: u32,
        height: u32,
        /// Pixel data. Convention: RGB uses 3 bytes per pixel, RGBA uses 4.
        data: Vec<u8>,
    },
}

/// A step result from the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step<Obs> {
    pub observation: Obs,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl<Obs> Step<Obs> {
    pub fn new(observation: Obs, reward: f32, terminated: bool, truncated: bool, info: Info) -> Self {
        Self { observation, reward, terminated, truncated, info }
    }

    /// Whether the episode ended, either naturally or by truncation.
    pub fn done(&self) -> bool { self.terminated || self.truncated }

    /// Map the observation while keeping the rest of the transition.
    pub fn map_observation<O2>(self, f: impl FnOnce(Obs) -> O2) -> Step<O2> {
        Step::new(f(self.observation), self.reward, self.terminated, self.truncated, self.info)
    }
}

/// Action in the erased form that workers and pools exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Discrete(u32),
    Continuous(Vec<f32>),
    MultiDiscrete(Vec<u32>),
}

/// Recoverable errors across the crate.
#[derive(thiserror::Error, Debug)]
pub enum GymError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),
    #[error("Environment not ready: {0}")]
    NotReady(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Environment has no attribute '{0}'")]
    Attribute(String),
    #[error("Precondition violated: {0}")]
    Precondition(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Worker died: {0}")]
    WorkerDied(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Convenience alias for results using GymError.
pub type Result<T> = std::result::Result<T, GymError>;

/// Core environment trait following the Gymnasium contract.
pub trait Env {
    type Obs;
    type Act;

    /// Reset the environment to an initial state.
    /// Implementations should re-seed internal RNGs when `seed` is provided.
    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info);

    /// Apply an action and advance the environment by one step.
    fn step(&mut self, action: Self::Act) -> Step<Self::Obs>;

    /// Descriptor of the actions this environment accepts.
    fn action_space(&self) -> SpaceSpec;

    /// Descriptor of the observations this environment produces.
    fn observation_space(&self) -> SpaceSpec;

    /// Render a frame of the current state, if supported.
    fn render(&self) -> Option<RenderFrame> { None }

    /// Close and release any external resources.
    fn close(&mut self) {}

    /// Read a named attribute. `None` means the attribute does not exist.
    fn get_attr(&self, _key: &str) -> Option<InfoValue> { None }

    /// Write a named attribute.
    fn set_attr(&mut self, key: &str, _value: InfoValue) -> Result<()> {
        Err(GymError::Attribute(key.to_string()))
    }
}

/// Conversion of a typed observation into the batched numeric form.
pub trait ToObservation {
    fn to_observation(&self) -> Observation;
}

impl<const N: usize> ToObservation for [f32; N] {
    fn to_observation(&self) -> Observation {
        Array1::from(self.to_vec()).into_dyn()
    }
}

impl ToObservation for Vec<f32> {
    fn to_observation(&self) -> Observation {
        Array1::from(self.clone()).into_dyn()
    }
}

impl ToObservation for f32 {
    fn to_observation(&self) -> Observation { ArrayD::from_elem(IxDyn(&[]), *self) }
}

impl ToObservation for i32 {
    fn to_observation(&self) -> Observation { ArrayD::from_elem(IxDyn(&[]), *self as f32) }
}

impl ToObservation for u32 {
    fn to_observation(&self) -> Observation { ArrayD::from_elem(IxDyn(&[]), *self as f32) }
}

impl ToObservation for ArrayD<f32> {
    fn to_observation(&self) -> Observation { self.clone() }
}

/// Conversion of an erased `Action` into an environment's typed action.
pub trait FromAction: Sized {
    fn from_action(action: &Action) -> Result<Self>;
}

impl FromAction for Action {
    fn from_action(action: &Action) -> Result<Self> { Ok(action.clone()) }
}

impl FromAction for u32 {
    fn from_action(action: &Action) -> Result<Self> {
        match action {
            Action::Discrete(a) => Ok(*a),
            other => Err(GymError::InvalidAction(format!("expected discrete action, got {other:?}"))),
        }
    }
}

impl FromAction for i32 {
    fn from_action(action: &Action) -> Result<Self> {
        match action {
            Action::Discrete(a) => i32::try_from(*a).map_err(|e| GymError::InvalidAction(e.to_string())),
            other => Err(GymError::InvalidAction(format!("expected discrete action, got {other:?}"))),
        }
    }
}

impl FromAction for f32 {
    fn from_action(action: &Action) -> Result<Self> {
        match action {
            Action::Continuous(v) if v.len() == 1 => Ok(v[0]),
            other => Err(GymError::InvalidAction(format!("expected 1-d continuous action, got {other:?}"))),
        }
    }
}

impl FromAction for Vec<f32> {
    fn from_action(action: &Action) -> Result<Self> {
        match action {
            Action::Continuous(v) => Ok(v.clone()),
            other => Err(GymError::InvalidAction(format!("expected continuous action, got {other:?}"))),
        }
    }
}

impl<const N: usize> FromAction for [f32; N] {
    fn from_action(action: &Action) -> Result<Self> {
        let v = Vec::<f32>::from_action(action)?;
        let len = v.len();
        v.try_into()
            .map_err(|_| GymError::InvalidAction(format!("expected {N} action dims, got {len}")))
    }
}

impl FromAction for Vec<u32> {
    fn from_action(action: &Action) -> Result<Self> {
        match action {
            Action::MultiDiscrete(v) => Ok(v.clone()),
            other => Err(GymError::InvalidAction(format!("expected multi-discrete action, got {other:?}"))),
        }
    }
}

/// Object-safe environment capability consumed by workers.
///
/// Observations and actions are in their erased form so the same capability
/// can be hosted in-process, in a child process or behind a socket.
pub trait EnvDyn: Send {
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)>;
    fn step(&mut self, action: &Action) -> Result<Step<Observation>>;
    fn action_space(&self) -> SpaceSpec;
    fn observation_space(&self) -> SpaceSpec;
    fn render(&self) -> Option<RenderFrame>;
    fn close(&mut self);
    fn get_attr(&self, key: &str) -> Result<InfoValue>;
    fn set_attr(&mut self, key: &str, value: InfoValue) -> Result<()>;
}

/// Adapter erasing a typed `Env` into an `EnvDyn`.
pub struct DynEnv<E: Env>(pub E);

impl<E> EnvDyn for DynEnv<E>
where
    E: Env + Send,
    E::Obs: ToObservation,
    E::Act: FromAction,
{
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        let (obs, info) = self.0.reset(seed);
        Ok((obs.to_observation(), info))
    }

    fn step(&mut self, action: &Action) -> Result<Step<Observation>> {
        let action = E::Act::from_action(action)?;
        Ok(self.0.step(action).map_observation(|o| o.to_observation()))
    }

    fn action_space(&self) -> SpaceSpec { self.0.action_space() }
    fn observation_space(&self) -> SpaceSpec { self.0.observation_space() }
    fn render(&self) -> Option<RenderFrame> { self.0.render() }
    fn close(&mut self) { self.0.close() }

    fn get_attr(&self, key: &str) -> Result<InfoValue> {
        self.0.get_attr(key).ok_or_else(|| GymError::Attribute(key.to_string()))
    }

    fn set_attr(&mut self, key: &str, value: InfoValue) -> Result<()> { self.0.set_attr(key, value) }
}

/// Box a typed environment behind the erased capability.
pub fn boxed<E>(env: E) -> Box<dyn EnvDyn>
where
    E: Env + Send + 'static,
    E::Obs: ToObservation,
    E::Act: FromAction,
{
    Box::new(DynEnv(env))
}
