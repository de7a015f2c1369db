//! Observation normalization over a vector env.
//!
//! Running statistics are merged batch by batch with the parallel-variance
//! formula (Chan et al.), so the result does not depend on how the stream of
//! observations was split into batches.

use std::sync::{Arc, RwLock};

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use super::venv::{ResetBatch, StepBatch, VectorEnv};
use super::worker::EnvWorker;
use crate::core::{Action, GymError, RenderFrame, Result};

/// Running mean and variance of observations, per feature.
///
/// Starts as a scalar (mean 0, var 1) and takes the feature shape on the
/// first update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningMeanStd {
    mean: ArrayD<f64>,
    var: ArrayD<f64>,
    count: u64,
    eps: f64,
    clip_max: Option<f64>,
}

impl Default for RunningMeanStd {
    fn default() -> Self {
        Self {
            mean: ArrayD::zeros(IxDyn(&[])),
            var: ArrayD::ones(IxDyn(&[])),
            count: 0,
            eps: f64::from(f32::EPSILON),
            clip_max: Some(10.0),
        }
    }
}

impl RunningMeanStd {
    pub fn new() -> Self { Self::default() }

    /// Bound for normalized values; `None` disables clipping.
    pub fn with_clip_max(mut self, clip_max: Option<f64>) -> Self {
        self.clip_max = clip_max;
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn mean(&self) -> &ArrayD<f64> { &self.mean }
    pub fn var(&self) -> &ArrayD<f64> { &self.var }
    pub fn count(&self) -> u64 { self.count }

    /// Forget everything seen so far. The only non-additive mutation.
    pub fn reset(&mut self) {
        *self = Self { eps: self.eps, clip_max: self.clip_max, ..Self::default() };
    }

    fn check_features(&self, features: &[usize]) -> Result<()> {
        if self.count > 0 && self.mean.shape() != features {
            return Err(GymError::InvalidObservation(format!(
                "observation features {features:?} do not match running stats {:?}",
                self.mean.shape()
            )));
        }
        Ok(())
    }

    /// Fold a batch (leading axis = samples) into the statistics.
    pub fn update(&mut self, batch: &ArrayD<f32>) -> Result<()> {
        if batch.ndim() == 0 {
            return Err(GymError::InvalidObservation("update needs a batch axis".into()));
        }
        let n = batch.len_of(Axis(0));
        if n == 0 {
            return Ok(());
        }
        self.check_features(&batch.shape()[1..])?;
        let data = batch.mapv(f64::from);
        let batch_mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| GymError::InvalidObservation("empty batch".into()))?;
        let batch_var = data.var_axis(Axis(0), 0.0);
        self.merge(batch_mean, batch_var, n as u64);
        Ok(())
    }

    fn merge(&mut self, batch_mean: ArrayD<f64>, batch_var: ArrayD<f64>, batch_count: u64) {
        let count = self.count as f64;
        let b = batch_count as f64;
        let total = count + b;

        // Full-shape operands go on the left so the scalar initial state broadcasts.
        let delta = batch_mean - &self.mean;
        let mean = &delta * (b / total) + &self.mean;
        let m2 = batch_var * b + &(&self.var * count) + &(delta.mapv(|d| d * d) * (count * b / total));

        self.mean = mean;
        self.var = m2 / total;
        self.count += batch_count;
    }

    /// `(obs - mean) / sqrt(var + eps)`, clipped to `clip_max` when set.
    ///
    /// Works on a single observation or a batch; trailing axes must match
    /// the statistics.
    pub fn norm(&self, obs: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if !obs.shape().ends_with(self.mean.shape()) {
            return Err(GymError::InvalidObservation(format!(
                "cannot normalize shape {:?} with running stats {:?}",
                obs.shape(),
                self.mean.shape()
            )));
        }
        let std = self.var.mapv(|v| (v + self.eps).sqrt());
        let mut out = (obs.mapv(f64::from) - &self.mean) / &std;
        if let Some(c) = self.clip_max {
            out.mapv_inplace(|v| v.clamp(-c, c));
        }
        Ok(out.mapv(|v| v as f32))
    }
}

/// Running stats shared between pools: one writer, any number of readers.
pub type SharedRunningMeanStd = Arc<RwLock<RunningMeanStd>>;

fn poisoned() -> GymError { GymError::Other("running stats lock poisoned".into()) }

/// A vector env whose observations are normalized by running statistics.
///
/// Indices, readiness and ordering behave exactly as in the wrapped pool.
pub struct VectorEnvNormObs<W: EnvWorker> {
    venv: VectorEnv<W>,
    update_obs_rms: bool,
    obs_rms: SharedRunningMeanStd,
}

impl<W: EnvWorker> VectorEnvNormObs<W> {
    /// Wrap `venv` with fresh statistics. Evaluation pools pass `update_obs_rms = false`.
    pub fn new(venv: VectorEnv<W>, update_obs_rms: bool) -> Self {
        Self { venv, update_obs_rms, obs_rms: Arc::new(RwLock::new(RunningMeanStd::default())) }
    }

    /// Share statistics gathered elsewhere (typically by a training pool).
    pub fn set_obs_rms(&mut self, obs_rms: SharedRunningMeanStd) { self.obs_rms = obs_rms; }

    /// Handle on the statistics, for sharing or persistence.
    pub fn get_obs_rms(&self) -> SharedRunningMeanStd { Arc::clone(&self.obs_rms) }

    pub fn set_update_obs_rms(&mut self, update: bool) { self.update_obs_rms = update; }

    pub fn update_obs_rms(&self) -> bool { self.update_obs_rms }

    fn process(&self, obs: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.update_obs_rms {
            self.obs_rms.write().map_err(|_| poisoned())?.update(obs)?;
        }
        self.obs_rms.read().map_err(|_| poisoned())?.norm(obs)
    }

    pub fn reset(&mut self, indices: Option<&[usize]>, seed: Option<u64>) -> Result<ResetBatch> {
        let mut batch = self.venv.reset(indices, seed)?;
        batch.observations = self.process(&batch.observations)?;
        Ok(batch)
    }

    pub fn step(&mut self, actions: &[Action], indices: Option<&[usize]>) -> Result<StepBatch> {
        let mut batch = self.venv.step(actions, indices)?;
        batch.observations = self.process(&batch.observations)?;
        Ok(batch)
    }

    pub fn poll(&mut self) -> Result<StepBatch> { self.step(&[], Some(&[])) }

    pub fn seed(&mut self, seed: Option<u64>) -> Result<Vec<Vec<u64>>> { self.venv.seed(seed) }

    pub fn render(&mut self, indices: Option<&[usize]>) -> Result<Vec<Option<RenderFrame>>> {
        self.venv.render(indices)
    }

    pub fn close(&mut self) -> Result<()> { self.venv.close() }

    pub fn len(&self) -> usize { self.venv.len() }

    pub fn is_empty(&self) -> bool { self.venv.is_empty() }

    pub fn inner(&self) -> &VectorEnv<W> { &self.venv }

    pub fn inner_mut(&mut self) -> &mut VectorEnv<W> { &mut self.venv }

    pub fn into_inner(self) -> VectorEnv<W> { self.venv }
}
