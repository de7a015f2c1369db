pub mod core;
pub mod spaces;
pub mod utils;
pub mod envs;
pub mod registry;
pub mod vector;

pub use crate::core::{boxed, Action, Env, EnvDyn, GymError, Info, InfoValue, Observation, RenderFrame, Result, Step};
pub use crate::spaces::{ActionSpace, BoxSpace, Discrete, MultiBinary, MultiDiscrete, Space, SpaceSpec};
pub use crate::envs::{CartPoleEnv, PendulumEnv};
pub use crate::registry::{make, register, EnvSpec, KwArgs};
pub use crate::vector::{
    DummyEnvWorker, DummyVectorEnv, EnvWorker, RemoteEnvServer, RemoteEnvWorker, RemoteVectorEnv, ResetBatch,
    RunningMeanStd, SharedRunningMeanStd, StepBatch, SubprocEnvWorker, SubprocVectorEnv, VectorEnv, VectorEnvConfig,
    VectorEnvNormObs, WorkerResult,
};
