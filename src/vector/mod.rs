// Vectorized environments: workers, the pool that drives them, and
// observation normalization on top.

pub mod norm;
pub mod venv;
pub mod worker;

pub use norm::{RunningMeanStd, SharedRunningMeanStd, VectorEnvNormObs};
pub use venv::{
    stack_observations, DummyVectorEnv, RemoteVectorEnv, ResetBatch, StepBatch, SubprocVectorEnv, VectorEnv,
    VectorEnvConfig,
};
pub use worker::{
    DummyEnvWorker, EnvWorker, RemoteEnvServer, RemoteEnvWorker, SubprocEnvWorker, WorkerResult,
};
