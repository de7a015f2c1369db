//! Environment workers: one environment instance per worker, driven through a
//! split `send`/`recv` protocol so a pool can keep several requests in flight.
//!
//! Substrates:
//! - [`DummyEnvWorker`]: in-process, `send` runs the environment immediately
//! - [`SubprocEnvWorker`]: environment hosted by a child process over stdio
//! - [`RemoteEnvWorker`]: environment hosted by a [`RemoteEnvServer`] over TCP

mod dummy;
pub mod protocol;
mod remote;
mod subproc;
mod transport;

use std::time::Duration;

use crate::core::{Action, GymError, Info, InfoValue, Observation, RenderFrame, Result, Step};
use crate::spaces::{ActionSpace, SpaceSpec};

pub use dummy::DummyEnvWorker;
pub use protocol::serve;
pub use remote::{RemoteEnvServer, RemoteEnvWorker};
pub use subproc::SubprocEnvWorker;

/// What `recv` hands back; the variant is decided by the preceding `send`.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerResult {
    Reset(Observation, Info),
    Step(Step<Observation>),
}

impl WorkerResult {
    pub fn into_reset(self) -> Result<(Observation, Info)> {
        match self {
            WorkerResult::Reset(obs, info) => Ok((obs, info)),
            WorkerResult::Step(_) => Err(GymError::Protocol("expected a reset result, got a step result".into())),
        }
    }

    pub fn into_step(self) -> Result<Step<Observation>> {
        match self {
            WorkerResult::Step(step) => Ok(step),
            WorkerResult::Reset(..) => Err(GymError::Protocol("expected a step result, got a reset result".into())),
        }
    }
}

/// The capability every worker substrate provides.
///
/// At most one request may be outstanding per worker: each `send` must be
/// matched by one `recv` before the next `send`.
pub trait EnvWorker: Sized {
    /// Read an attribute of the owned environment.
    fn get_env_attr(&mut self, key: &str) -> Result<InfoValue>;

    /// Write an attribute of the owned environment.
    fn set_env_attr(&mut self, key: &str, value: InfoValue) -> Result<()>;

    /// Issue a reset request; `recv` will yield [`WorkerResult::Reset`].
    fn send_reset(&mut self, seed: Option<u64>) -> Result<()>;

    /// Issue a step request; `recv` will yield [`WorkerResult::Step`].
    fn send_step(&mut self, action: Action) -> Result<()>;

    /// `None` requests a reset, anything else a step with that action.
    fn send(&mut self, action: Option<Action>) -> Result<()> {
        match action {
            None => self.send_reset(None),
            Some(action) => self.send_step(action),
        }
    }

    /// Block until the result of the last `send` is available.
    fn recv(&mut self) -> Result<WorkerResult>;

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        self.send_reset(seed)?;
        self.recv()?.into_reset()
    }

    /// `send` then `recv`, for synchronous single-worker use.
    fn step(&mut self, action: Action) -> Result<Step<Observation>> {
        self.send_step(action)?;
        self.recv()?.into_step()
    }

    /// Positions in `workers` that are ready for `recv`.
    ///
    /// Returns at most `wait_num` positions in ascending order. With a
    /// timeout this never blocks past it and may return fewer (or none).
    fn wait(workers: &[&Self], wait_num: usize, timeout: Option<Duration>) -> Vec<usize>;

    /// The cached, seedable action space.
    fn action_space(&self) -> &ActionSpace;

    fn action_space_mut(&mut self) -> &mut ActionSpace;

    fn observation_space(&self) -> &SpaceSpec;

    /// Seed the action-space sampler only; the environment's own RNG is untouched.
    fn seed(&mut self, seed: Option<u64>) -> Vec<u64> {
        self.action_space_mut().seed(seed)
    }

    fn sample_action(&mut self) -> Action {
        self.action_space_mut().sample()
    }

    fn render(&mut self) -> Result<Option<RenderFrame>>;

    fn is_closed(&self) -> bool;

    /// Whether the environment has been reset at least once.
    fn is_reset(&self) -> bool;

    /// Release the environment and the substrate. Idempotent.
    fn close(&mut self) -> Result<()>;
}

pub(crate) fn ensure_open(closed: bool) -> Result<()> {
    if closed {
        return Err(GymError::Precondition("worker is closed".into()));
    }
    Ok(())
}
