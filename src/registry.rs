//! Registration and specs.
//! Minimal registry system to construct environments by id with associated EnvSpec.
//!
//! The worker binary uses it to build the environment it hosts, so anything
//! registered here can run in-process, in a child process or behind a socket.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::core::{boxed, Env, EnvDyn, FromAction, GymError, InfoValue, Result, ToObservation};
use crate::envs::{CartPoleEnv, PendulumEnv};

/// Key-value kwargs for make(). Keep simple: stringly-typed values.
pub type KwArgs = HashMap<String, String>;

/// Environment specification metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Unique identifier like "CartPole-v1".
    pub id: String,
    /// Suggested max episode steps; applied as the `max_episode_steps` attribute when set.
    pub max_episode_steps: Option<u32>,
    /// Target reward threshold for a "solved" score, if defined.
    pub reward_threshold: Option<f32>,
    /// Whether environment has inherent nondeterminism beyond RNG seed.
    pub nondeterministic: bool,
}

impl EnvSpec {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            max_episode_steps: None,
            reward_threshold: None,
            nondeterministic: false,
        }
    }

    pub fn with_max_episode_steps(mut self, steps: u32) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    pub fn with_reward_threshold(mut self, threshold: f32) -> Self {
        self.reward_threshold = Some(threshold);
        self
    }
}

/// Factory closure type for constructing environments with kwargs.
pub type FactoryFn = Box<dyn Fn(&KwArgs) -> Result<Box<dyn EnvDyn>> + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    specs: HashMap<String, EnvSpec>,
    factories: HashMap<String, FactoryFn>,
}

struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    fn new() -> Self { Self { inner: RwLock::new(RegistryInner::default()) } }

    fn with_builtins() -> Self {
        let r = Self::new();
        let builtins = [
            (
                EnvSpec::new("CartPole-v1").with_max_episode_steps(500).with_reward_threshold(475.0),
                factory_of(|k: &KwArgs| Ok(CartPoleEnv::new(seed_kwarg(k)?.unwrap_or(1_234_567)))),
            ),
            (
                EnvSpec::new("Pendulum-v1").with_max_episode_steps(200),
                factory_of(|k: &KwArgs| Ok(PendulumEnv::new(seed_kwarg(k)?.unwrap_or(42)))),
            ),
        ];
        for (spec, factory) in builtins {
            // Fresh registry, ids are distinct.
            let _ = r.register(spec, factory);
        }
        r
    }

    fn register(&self, spec: EnvSpec, factory: FactoryFn) -> Result<()> {
        let mut g = self.inner.write().map_err(|_| GymError::Other("registry poisoned".into()))?;
        if g.specs.contains_key(&spec.id) {
            return Err(GymError::Other(format!("Env id already registered: {}", spec.id)));
        }
        g.factories.insert(spec.id.clone(), factory);
        g.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    fn get_spec(&self, id: &str) -> Option<EnvSpec> {
        let g = self.inner.read().ok()?;
        g.specs.get(id).cloned()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .map(|g| g.specs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn make(&self, id: &str, kwargs: &KwArgs) -> Result<Box<dyn EnvDyn>> {
        let guard = self.inner.read().map_err(|_| GymError::Other("registry poisoned".into()))?;
        let factory = guard
            .factories
            .get(id)
            .ok_or_else(|| GymError::Other(format!("Unknown environment id: {}", id)))?;
        let mut env = factory(kwargs)?;
        let max_steps = match kwargs.get("max_episode_steps") {
            Some(v) => Some(v.parse::<u32>().map_err(|e| GymError::InvalidConfig(format!("max_episode_steps: {e}")))?),
            None => guard.specs.get(id).and_then(|s| s.max_episode_steps),
        };
        if let Some(steps) = max_steps {
            env.set_attr("max_episode_steps", InfoValue::from(steps))?;
        }
        Ok(env)
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::with_builtins)
}

/// Parse the optional `seed` kwarg.
pub fn seed_kwarg(kwargs: &KwArgs) -> Result<Option<u64>> {
    kwargs
        .get("seed")
        .map(|s| s.parse::<u64>().map_err(|e| GymError::InvalidConfig(format!("seed: {e}"))))
        .transpose()
}

/// Register an environment spec and its factory globally.
pub fn register(spec: EnvSpec, factory: FactoryFn) -> Result<()> { registry().register(spec, factory) }

/// Fetch a registered EnvSpec by id.
pub fn get_spec(id: &str) -> Option<EnvSpec> { registry().get_spec(id) }

/// Sorted ids of every registered environment.
pub fn registered_ids() -> Vec<String> { registry().ids() }

/// Construct an environment by id with kwargs, returning a boxed dynamic env.
pub fn make<S: AsRef<str>>(id: S, kwargs: &KwArgs) -> Result<Box<dyn EnvDyn>> { registry().make(id.as_ref(), kwargs) }

/// Helper to adapt a concrete Env constructor into a factory function.
pub fn factory_of<E, F>(ctor: F) -> FactoryFn
where
    E: Env + Send + 'static,
    E::Obs: ToObservation,
    E::Act: FromAction,
    F: Fn(&KwArgs) -> Result<E> + Send + Sync + 'static,
{
    Box::new(move |kwargs: &KwArgs| Ok(boxed(ctor(kwargs)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, Info, RenderFrame, Step};
    use crate::spaces::{Discrete, SpaceSpec};

    #[derive(Default)]
    struct Dummy;
    impl Env for Dummy {
        type Obs = i32;
        type Act = i32;
        fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) { (0, Info::new()) }
        fn step(&mut self, a: Self::Act) -> Step<Self::Obs> { Step::new(a, 0.0, true, false, Info::new()) }
        fn action_space(&self) -> SpaceSpec { Discrete::new(10).into() }
        fn observation_space(&self) -> SpaceSpec { Discrete::new(10).into() }
        fn render(&self) -> Option<RenderFrame> { Some(RenderFrame::Text("dummy".into())) }
    }

    #[test]
    fn register_and_make_dummy() {
        register(EnvSpec::new("Dummy-v0"), factory_of(|_k: &KwArgs| Ok(Dummy))).expect("register ok");
        let mut env = make("Dummy-v0", &KwArgs::new()).expect("make ok");
        let (obs, _info) = env.reset(None).unwrap();
        assert_eq!(obs.ndim(), 0);
        let s = env.step(&Action::Discrete(5)).unwrap();
        assert_eq!(s.observation.iter().copied().collect::<Vec<_>>(), vec![5.0]);
        assert!(matches!(env.render(), Some(RenderFrame::Text(_))));
        assert!(matches!(env.get_attr("anything"), Err(GymError::Attribute(_))));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        register(EnvSpec::new("Twice-v0"), factory_of(|_k: &KwArgs| Ok(Dummy))).unwrap();
        assert!(register(EnvSpec::new("Twice-v0"), factory_of(|_k: &KwArgs| Ok(Dummy))).is_err());
    }

    #[test]
    fn builtins_apply_spec_and_kwargs() {
        assert!(registered_ids().contains(&"CartPole-v1".to_string()));
        let env = make("CartPole-v1", &KwArgs::new()).unwrap();
        assert_eq!(env.get_attr("max_episode_steps").unwrap(), InfoValue::I64(500));

        let mut kwargs = KwArgs::new();
        kwargs.insert("max_episode_steps".into(), "25".into());
        kwargs.insert("seed".into(), "3".into());
        let env = make("Pendulum-v1", &kwargs).unwrap();
        assert_eq!(env.get_attr("max_episode_steps").unwrap(), InfoValue::I64(25));

        kwargs.insert("seed".into(), "not-a-number".into());
        assert!(matches!(make("Pendulum-v1", &kwargs), Err(GymError::InvalidConfig(_))));
        assert!(make("Missing-v9", &KwArgs::new()).is_err());
    }
}
