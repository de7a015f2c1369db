// Vectorized environments: a fixed pool of workers behind one batched interface.

use std::net::ToSocketAddrs;
use std::process::Command;
use std::time::Duration;

use ndarray::{Array1, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::worker::{DummyEnvWorker, EnvWorker, RemoteEnvWorker, SubprocEnvWorker, WorkerResult};
use crate::core::{Action, EnvDyn, GymError, Info, InfoValue, Observation, RenderFrame, Result, Step};
use crate::spaces::{ActionSpace, SpaceSpec};
use crate::utils::rng::worker_seeds;

/// Readiness settings for a pool.
///
/// With both fields `None` the pool is synchronous: every `step` waits for
/// all addressed workers. Setting either makes it asynchronous.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorEnvConfig {
    /// Minimum number of ready workers a `step` waits for; `None` means all.
    pub wait_num: Option<usize>,
    /// Upper bound on each readiness wait.
    pub timeout: Option<Duration>,
}

impl VectorEnvConfig {
    pub fn new() -> Self { Self::default() }

    pub fn with_wait_num(mut self, wait_num: usize) -> Self {
        self.wait_num = Some(wait_num);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Batched reset results; row `k` belongs to environment `env_ids[k]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResetBatch {
    pub env_ids: Vec<usize>,
    pub observations: ArrayD<f32>,
    pub infos: Vec<Info>,
}

impl ResetBatch {
    pub fn len(&self) -> usize { self.env_ids.len() }
    pub fn is_empty(&self) -> bool { self.env_ids.is_empty() }
}

/// Batched step results; row `k` belongs to environment `env_ids[k]`.
#[derive(Clone, Debug, PartialEq)]
pub struct StepBatch {
    pub env_ids: Vec<usize>,
    pub observations: ArrayD<f32>,
    pub rewards: Array1<f32>,
    pub terminated: Array1<bool>,
    pub truncated: Array1<bool>,
    pub infos: Vec<Info>,
}

impl StepBatch {
    pub fn len(&self) -> usize { self.env_ids.len() }
    pub fn is_empty(&self) -> bool { self.env_ids.is_empty() }

    /// Episode ended, by termination or truncation.
    pub fn dones(&self) -> Array1<bool> {
        self.terminated.iter().zip(self.truncated.iter()).map(|(a, b)| *a || *b).collect()
    }

    fn from_steps(env_ids: Vec<usize>, steps: Vec<Step<Observation>>, obs_shape: &[usize]) -> Result<Self> {
        let mut observations = Vec::with_capacity(steps.len());
        let mut rewards = Vec::with_capacity(steps.len());
        let mut terminated = Vec::with_capacity(steps.len());
        let mut truncated = Vec::with_capacity(steps.len());
        let mut infos = Vec::with_capacity(steps.len());
        for step in steps {
            observations.push(step.observation);
            rewards.push(step.reward);
            terminated.push(step.terminated);
            truncated.push(step.truncated);
            infos.push(step.info);
        }
        Ok(Self {
            env_ids,
            observations: stack_observations(&observations, obs_shape)?,
            rewards: Array1::from(rewards),
            terminated: Array1::from(terminated),
            truncated: Array1::from(truncated),
            infos,
        })
    }
}

/// Stack per-env observations along a new leading axis.
///
/// An empty batch keeps the per-env shape: `[0, ...obs_shape]`.
pub fn stack_observations(observations: &[Observation], obs_shape: &[usize]) -> Result<ArrayD<f32>> {
    if observations.is_empty() {
        let mut shape = vec![0];
        shape.extend_from_slice(obs_shape);
        return Ok(ArrayD::zeros(IxDyn(&shape)));
    }
    let views: Vec<_> = observations.iter().map(|o| o.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map_err(|e| GymError::InvalidObservation(format!("observations do not stack: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Idle,
    Outstanding,
}

/// A fixed-size pool of environment workers.
///
/// Synchronous pools step every addressed worker to completion. Asynchronous
/// pools (`wait_num < N` or a timeout) return as soon as `wait_num` workers
/// are ready and leave the rest outstanding; later `step` calls collect them.
pub struct VectorEnv<W: EnvWorker> {
    workers: Vec<W>,
    slots: Vec<Slot>,
    // Outstanding env ids in the order their step was sent.
    outstanding: Vec<usize>,
    // Received but not yet returned, because a sibling in the same call failed.
    held: Vec<(usize, Step<Observation>)>,
    wait_num: usize,
    timeout: Option<Duration>,
    is_async: bool,
    is_closed: bool,
    obs_shape: Vec<usize>,
}

/// Pool of in-process workers.
pub type DummyVectorEnv = VectorEnv<DummyEnvWorker>;
/// Pool of child-process workers.
pub type SubprocVectorEnv = VectorEnv<SubprocEnvWorker>;
/// Pool of TCP-connected workers.
pub type RemoteVectorEnv = VectorEnv<RemoteEnvWorker>;

impl<W: EnvWorker> VectorEnv<W> {
    pub fn new(workers: Vec<W>, config: VectorEnvConfig) -> Result<Self> {
        let n = workers.len();
        if n == 0 {
            return Err(GymError::InvalidConfig("a vector env needs at least one worker".into()));
        }
        let wait_num = config.wait_num.unwrap_or(n);
        if wait_num == 0 || wait_num > n {
            return Err(GymError::InvalidConfig(format!("wait_num must be in 1..={n}, got {wait_num}")));
        }
        if config.timeout.is_some_and(|t| t.is_zero()) {
            return Err(GymError::InvalidConfig("timeout must be positive".into()));
        }
        let is_async = wait_num != n || config.timeout.is_some();
        let obs_shape = workers[0].observation_space().shape();
        debug!(workers = n, wait_num, timeout = ?config.timeout, is_async, "vector env ready");
        Ok(Self {
            workers,
            slots: vec![Slot::Idle; n],
            outstanding: Vec::new(),
            held: Vec::new(),
            wait_num,
            timeout: config.timeout,
            is_async,
            is_closed: false,
            obs_shape,
        })
    }

    pub fn len(&self) -> usize { self.workers.len() }

    pub fn is_empty(&self) -> bool { self.workers.is_empty() }

    pub fn is_async(&self) -> bool { self.is_async }

    pub fn is_closed(&self) -> bool { self.is_closed }

    /// Env ids whose step result has not been returned yet, in send order.
    pub fn outstanding(&self) -> &[usize] { &self.outstanding }

    /// Action space of the first worker; all workers are expected to agree.
    pub fn action_space(&self) -> &ActionSpace { self.workers[0].action_space() }

    pub fn observation_space(&self) -> &SpaceSpec { self.workers[0].observation_space() }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed {
            return Err(GymError::Precondition("vector env is closed".into()));
        }
        Ok(())
    }

    /// Validate explicit indices, or default to every env.
    fn resolve(&self, indices: Option<&[usize]>) -> Result<Vec<usize>> {
        let Some(indices) = indices else {
            return Ok((0..self.workers.len()).collect());
        };
        let mut seen = vec![false; self.workers.len()];
        for &i in indices {
            match seen.get_mut(i) {
                None => {
                    return Err(GymError::Precondition(format!(
                        "env index {i} out of range for {} envs",
                        self.workers.len()
                    )))
                }
                Some(true) => return Err(GymError::Precondition(format!("env index {i} given twice"))),
                Some(flag) => *flag = true,
            }
        }
        Ok(indices.to_vec())
    }

    fn ensure_idle(&self, ids: &[usize]) -> Result<()> {
        match ids.iter().find(|&&i| self.slots[i] == Slot::Outstanding) {
            Some(i) => Err(GymError::Precondition(format!("env {i} still has a step outstanding"))),
            None => Ok(()),
        }
    }

    /// Reset the addressed envs (all by default) and wait for every one of them.
    ///
    /// With a seed, env `i` is reset with `seed + i`.
    pub fn reset(&mut self, indices: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch> {
        self.ensure_open()?;
        let ids = self.resolve(indices)?;
        self.ensure_idle(&ids)?;
        debug!(?ids, ?seed, "reset");
        let seeds = worker_seeds(seed, self.workers.len());

        let mut first_err = None;
        let mut sent = Vec::with_capacity(ids.len());
        for &i in &ids {
            match self.workers[i].send_reset(seeds[i]) {
                Ok(()) => sent.push(i),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        let mut observations = Vec::with_capacity(sent.len());
        let mut infos = Vec::with_capacity(sent.len());
        for &i in &sent {
            match self.workers[i].recv().and_then(WorkerResult::into_reset) {
                Ok((obs, mut info)) => {
                    info.insert("env_id", InfoValue::from(i));
                    observations.push(obs);
                    infos.push(info);
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(ResetBatch { env_ids: ids, observations: stack_observations(&observations, &self.obs_shape)?, infos })
    }

    /// Step the addressed envs with one action each.
    ///
    /// Indices default to every reset env without a step in flight. A
    /// synchronous pool returns rows in `indices` order. An asynchronous pool
    /// returns only the ready envs, in send order, and keeps the others
    /// outstanding until a later call collects them.
    ///
    /// If any addressed env fails, the error is returned and the envs that did
    /// finish stay outstanding with their results kept; the next `step` or
    /// [`poll`](Self::poll) returns them ahead of newer ones.
    pub fn step(&mut self, actions: &[Action], indices: Option<&[usize]>) -> Result<StepBatch> {
        self.ensure_open()?;
        let ids = match indices {
            Some(_) => self.resolve(indices)?,
            None => (0..self.workers.len())
                .filter(|&i| self.workers[i].is_reset() && self.slots[i] == Slot::Idle)
                .collect(),
        };
        if actions.len() != ids.len() {
            return Err(GymError::Precondition(format!(
                "got {} actions for {} environments",
                actions.len(),
                ids.len()
            )));
        }
        if let Some(i) = ids.iter().find(|&&i| !self.workers[i].is_reset()) {
            return Err(GymError::Precondition(format!("env {i} must be reset before stepping")));
        }
        self.ensure_idle(&ids)?;

        if self.is_async {
            self.step_async(&ids, actions)
        } else {
            self.step_sync(ids, actions)
        }
    }

    fn step_sync(&mut self, ids: Vec<usize>, actions: &[Action]) -> Result<StepBatch> {
        debug!(?ids, "step");
        let mut first_err = None;
        for (&i, action) in ids.iter().zip(actions) {
            match self.workers[i].send_step(action.clone()) {
                Ok(()) => self.mark_outstanding(i),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        let pending = self.unheld_outstanding();
        self.receive_steps(&pending, &mut first_err);
        if let Some(e) = first_err {
            return Err(e);
        }
        self.deliver()
    }

    fn step_async(&mut self, ids: &[usize], actions: &[Action]) -> Result<StepBatch> {
        for (&i, action) in ids.iter().zip(actions) {
            self.workers[i].send_step(action.clone())?;
            self.mark_outstanding(i);
        }
        if self.outstanding.is_empty() {
            return StepBatch::from_steps(Vec::new(), Vec::new(), &self.obs_shape);
        }

        let ready = loop {
            let pending_ids = self.unheld_outstanding();
            let want = self.wait_num.min(self.outstanding.len()).saturating_sub(self.held.len()).min(pending_ids.len());
            let picked: Vec<usize> = if want > 0 {
                // Held results are ready already, so only peek at the rest.
                let timeout = if self.held.is_empty() { self.timeout } else { Some(Duration::ZERO) };
                let pending: Vec<&W> = pending_ids.iter().map(|&i| &self.workers[i]).collect();
                W::wait(&pending, want, timeout).into_iter().map(|p| pending_ids[p]).collect()
            } else {
                Vec::new()
            };
            if !picked.is_empty() || !self.held.is_empty() {
                break picked;
            }
        };
        debug!(sent = ?ids, ?ready, held = self.held.len(), "async step");

        let mut first_err = None;
        self.receive_steps(&ready, &mut first_err);
        if let Some(e) = first_err {
            return Err(e);
        }
        self.deliver()
    }

    fn mark_outstanding(&mut self, i: usize) {
        self.slots[i] = Slot::Outstanding;
        self.outstanding.push(i);
    }

    fn unheld_outstanding(&self) -> Vec<usize> {
        self.outstanding.iter().copied().filter(|i| self.held.iter().all(|(h, _)| h != i)).collect()
    }

    /// Receive from each env. Results are held until `deliver`; a failed env
    /// drops out of the outstanding set.
    fn receive_steps(&mut self, ids: &[usize], first_err: &mut Option<GymError>) {
        for &i in ids {
            match self.workers[i].recv().and_then(WorkerResult::into_step) {
                Ok(mut step) => {
                    step.info.insert("env_id", InfoValue::from(i));
                    self.held.push((i, step));
                }
                Err(e) => {
                    warn!(env = i, error = %e, "step failed");
                    self.slots[i] = Slot::Idle;
                    self.outstanding.retain(|&o| o != i);
                    first_err.get_or_insert(e);
                }
            }
        }
    }

    /// Hand every held result to the caller, in send order.
    fn deliver(&mut self) -> Result<StepBatch> {
        let mut held = std::mem::take(&mut self.held);
        let mut env_ids = Vec::with_capacity(held.len());
        let mut steps = Vec::with_capacity(held.len());
        let mut still_out = Vec::with_capacity(self.outstanding.len());
        for &i in &self.outstanding {
            match held.iter().position(|(h, _)| *h == i) {
                Some(p) => {
                    steps.push(held.swap_remove(p).1);
                    env_ids.push(i);
                }
                None => still_out.push(i),
            }
        }
        self.outstanding = still_out;
        for &i in &env_ids {
            self.slots[i] = Slot::Idle;
        }
        StepBatch::from_steps(env_ids, steps, &self.obs_shape)
    }

    /// Collect already-outstanding steps without sending new actions.
    pub fn poll(&mut self) -> Result<StepBatch> { self.step(&[], Some(&[])) }

    /// Seed every worker's action sampler with `seed + index`.
    pub fn seed(&mut self, seed: Option<u64>) -> Result<Vec<Vec<u64>>> {
        self.ensure_open()?;
        let seeds = worker_seeds(seed, self.workers.len());
        Ok(self.workers.iter_mut().zip(seeds).map(|(w, s)| w.seed(s)).collect())
    }

    /// Sample one action per addressed env from its cached action space.
    pub fn sample_actions(&mut self, indices: Option<&[usize]>) -> Result<Vec<Action>> {
        self.ensure_open()?;
        let ids = self.resolve(indices)?;
        Ok(ids.iter().map(|&i| self.workers[i].sample_action()).collect())
    }

    pub fn render(&mut self, indices: Option<&[usize]>) -> Result<Vec<Option<RenderFrame>>> {
        self.ensure_open()?;
        if !self.outstanding.is_empty() {
            return Err(GymError::Precondition(format!(
                "environments {:?} are still stepping, cannot render",
                self.outstanding
            )));
        }
        let ids = self.resolve(indices)?;
        ids.iter().map(|&i| self.workers[i].render()).collect()
    }

    pub fn get_env_attr(&mut self, key: &str, indices: Option<&[usize]>) -> Result<Vec<InfoValue>> {
        self.ensure_open()?;
        let ids = self.resolve(indices)?;
        self.ensure_idle(&ids)?;
        ids.iter().map(|&i| self.workers[i].get_env_attr(key)).collect()
    }

    pub fn set_env_attr(&mut self, key: &str, value: InfoValue, indices: Option<&[usize]>) -> Result<()> {
        self.ensure_open()?;
        let ids = self.resolve(indices)?;
        self.ensure_idle(&ids)?;
        for &i in &ids {
            self.workers[i].set_env_attr(key, value.clone())?;
        }
        Ok(())
    }

    /// Close every worker. Keeps going past failures and reports the first one.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed {
            return Ok(());
        }
        self.is_closed = true;
        let mut first_err = None;
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if let Err(e) = worker.close() {
                warn!(env = i, error = %e, "worker failed to close");
                first_err.get_or_insert(e);
            }
        }
        self.outstanding.clear();
        self.held.clear();
        self.slots.fill(Slot::Idle);
        debug!("vector env closed");
        first_err.map_or(Ok(()), Err)
    }
}

impl<W: EnvWorker> Drop for VectorEnv<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl VectorEnv<DummyEnvWorker> {
    /// One in-process worker per environment constructor.
    pub fn from_fns<I, F>(env_fns: I, config: VectorEnvConfig) -> Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Result<Box<dyn EnvDyn>>,
    {
        let workers = env_fns.into_iter().map(|f| f().map(DummyEnvWorker::new)).collect::<Result<Vec<_>>>()?;
        Self::new(workers, config)
    }
}

impl VectorEnv<SubprocEnvWorker> {
    /// One child process per command; each must speak the worker protocol on stdio.
    pub fn spawn<I>(commands: I, config: VectorEnvConfig) -> Result<Self>
    where
        I: IntoIterator<Item = Command>,
    {
        let workers = commands.into_iter().map(SubprocEnvWorker::spawn).collect::<Result<Vec<_>>>()?;
        Self::new(workers, config)
    }
}

impl VectorEnv<RemoteEnvWorker> {
    /// One connection per host address.
    pub fn connect<I, A>(addrs: I, connect_timeout: Duration, config: VectorEnvConfig) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: ToSocketAddrs,
    {
        let workers = addrs
            .into_iter()
            .map(|addr| RemoteEnvWorker::connect(addr, connect_timeout))
            .collect::<Result<Vec<_>>>()?;
        Self::new(workers, config)
    }
}
