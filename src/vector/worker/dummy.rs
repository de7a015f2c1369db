use std::time::Duration;

use super::{ensure_open, EnvWorker, WorkerResult};
use crate::core::{Action, EnvDyn, GymError, InfoValue, RenderFrame, Result};
use crate::spaces::{ActionSpace, SpaceSpec};

/// In-process worker: `send` runs the environment right away and buffers the result.
pub struct DummyEnvWorker {
    env: Box<dyn EnvDyn>,
    action_space: ActionSpace,
    observation_space: SpaceSpec,
    result: Option<Result<WorkerResult>>,
    is_closed: bool,
    is_reset: bool,
}

impl DummyEnvWorker {
    pub fn new(env: Box<dyn EnvDyn>) -> Self {
        let action_space = ActionSpace::new(env.action_space());
        let observation_space = env.observation_space();
        Self { env, action_space, observation_space, result: None, is_closed: false, is_reset: false }
    }
}

impl EnvWorker for DummyEnvWorker {
    fn get_env_attr(&mut self, key: &str) -> Result<InfoValue> {
        ensure_open(self.is_closed)?;
        self.env.get_attr(key)
    }

    fn set_env_attr(&mut self, key: &str, value: InfoValue) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.env.set_attr(key, value)
    }

    fn send_reset(&mut self, seed: Option<u64>) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.result = Some(self.env.reset(seed).map(|(obs, info)| WorkerResult::Reset(obs, info)));
        Ok(())
    }

    fn send_step(&mut self, action: Action) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.result = Some(self.env.step(&action).map(WorkerResult::Step));
        Ok(())
    }

    fn recv(&mut self) -> Result<WorkerResult> {
        let result = self
            .result
            .take()
            .ok_or_else(|| GymError::NotReady("recv called without a pending send".into()))??;
        if matches!(result, WorkerResult::Reset(..)) {
            self.is_reset = true;
        }
        Ok(result)
    }

    fn wait(workers: &[&Self], wait_num: usize, _timeout: Option<Duration>) -> Vec<usize> {
        // Every send has already completed.
        (0..workers.len().min(wait_num)).collect()
    }

    fn action_space(&self) -> &ActionSpace { &self.action_space }

    fn action_space_mut(&mut self) -> &mut ActionSpace { &mut self.action_space }

    fn observation_space(&self) -> &SpaceSpec { &self.observation_space }

    fn render(&mut self) -> Result<Option<RenderFrame>> {
        ensure_open(self.is_closed)?;
        Ok(self.env.render())
    }

    fn is_closed(&self) -> bool { self.is_closed }

    fn is_reset(&self) -> bool { self.is_reset }

    fn close(&mut self) -> Result<()> {
        if self.is_closed {
            return Ok(());
        }
        self.is_closed = true;
        self.result = None;
        self.env.close();
        Ok(())
    }
}
