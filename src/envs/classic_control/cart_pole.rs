use crate::core::{Env, GymError, Info, InfoValue, RenderFrame, Result, Step};
use crate::spaces::{BoxSpace, Discrete, SpaceSpec};
use crate::utils::rng::{rng_from_seed, RngStream};
use rand::distributions::Distribution;

/// CartPole-v1 environment (minimal faithful implementation of Gymnasium classic_control)
/// Observation: [x, x_dot, theta, theta_dot]
/// Action space: Discrete(2) {0: push left, 1: push right}
/// Reward: 1.0 per step until termination/truncation
///
/// Attributes: `gravity`, `force_mag`, `tau`, `max_episode_steps` (read/write)
/// and `steps` (read-only).
pub struct CartPoleEnv {
    // State
    x: f32,
    x_dot: f32,
    theta: f32,
    theta_dot: f32,

    // Episode management
    steps: u32,
    pub max_episode_steps: u32,

    rng: RngStream,

    // Physics constants (from Gymnasium)
    gravity: f32,
    masscart: f32,
    masspole: f32,
    length: f32,    // half the pole's length
    force_mag: f32,
    tau: f32,       // seconds between state updates

    // Termination thresholds
    theta_threshold_radians: f32,
    x_threshold: f32,
}

impl Default for CartPoleEnv {
    fn default() -> Self { Self::new(1_234_567) }
}

impl CartPoleEnv {
    pub fn new(seed: u64) -> Self {
        Self {
            x: 0.0,
            x_dot: 0.0,
            theta: 0.0,
            theta_dot: 0.0,
            steps: 0,
            max_episode_steps: 500,
            rng: rng_from_seed(seed),
            gravity: 9.8,
            masscart: 1.0,
            masspole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            theta_threshold_radians: 12.0_f32.to_radians(),
            x_threshold: 2.4,
        }
    }

    fn total_mass(&self) -> f32 { self.masscart + self.masspole }

    fn polemass_length(&self) -> f32 { self.masspole * self.length }

    fn terminated(&self) -> bool {
        self.x < -self.x_threshold
            || self.x > self.x_threshold
            || self.theta < -self.theta_threshold_radians
            || self.theta > self.theta_threshold_radians
    }

    fn obs(&self) -> [f32; 4] { [self.x, self.x_dot, self.theta, self.theta_dot] }
}

fn positive_f32(key: &str, value: &InfoValue) -> Result<f32> {
    match value.as_f64() {
        Some(v) if v > 0.0 => Ok(v as f32),
        _ => Err(GymError::InvalidConfig(format!("{key} must be a positive number, got {value:?}"))),
    }
}

impl Env for CartPoleEnv {
    type Obs = [f32; 4];
    type Act = u32; // 0 or 1

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) {
        if let Some(s) = seed { self.rng = rng_from_seed(s); }
        // small uniform noise in [-0.05, 0.05]
        let uni = rand::distributions::Uniform::new_inclusive(-0.05f32, 0.05f32);
        self.x = uni.sample(&mut self.rng);
        self.x_dot = uni.sample(&mut self.rng);
        self.theta = uni.sample(&mut self.rng);
        self.theta_dot = uni.sample(&mut self.rng);
        self.steps = 0;
        (self.obs(), Info::new())
    }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        let force = if action == 1 { self.force_mag } else { -self.force_mag };
        let cos_theta = self.theta.cos();
        let sin_theta = self.theta.sin();
        let total_mass = self.total_mass();
        let polemass_length = self.polemass_length();

        let temp = (force + polemass_length * self.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.gravity * sin_theta - cos_theta * temp)
            / (self.length * (4.0 / 3.0 - self.masspole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - polemass_length * theta_acc * cos_theta / total_mass;

        // Euler integration
        self.x += self.tau * self.x_dot;
        self.x_dot += self.tau * x_acc;
        self.theta += self.tau * self.theta_dot;
        self.theta_dot += self.tau * theta_acc;

        self.steps += 1;
        let terminated = self.terminated();
        let truncated = self.steps >= self.max_episode_steps;
        Step::new(self.obs(), 1.0, terminated, truncated, Info::new())
    }

    fn action_space(&self) -> SpaceSpec { Discrete::new(2).into() }

    fn observation_space(&self) -> SpaceSpec {
        let high = vec![self.x_threshold * 2.0, f32::MAX, self.theta_threshold_radians * 2.0, f32::MAX];
        let low = high.iter().map(|h| -h).collect();
        BoxSpace::new(low, high).into()
    }

    fn render(&self) -> Option<RenderFrame> {
        Some(RenderFrame::Text(format!(
            "cartpole x={:.3} x_dot={:.3} theta={:.3} theta_dot={:.3} step={}",
            self.x, self.x_dot, self.theta, self.theta_dot, self.steps
        )))
    }

    fn get_attr(&self, key: &str) -> Option<InfoValue> {
        match key {
            "gravity" => Some(self.gravity.into()),
            "force_mag" => Some(self.force_mag.into()),
            "tau" => Some(self.tau.into()),
            "max_episode_steps" => Some(self.max_episode_steps.into()),
            "steps" => Some(self.steps.into()),
            _ => None,
        }
    }

    fn set_attr(&mut self, key: &str, value: InfoValue) -> Result<()> {
        match key {
            "gravity" => self.gravity = positive_f32(key, &value)?,
            "force_mag" => self.force_mag = positive_f32(key, &value)?,
            "tau" => self.tau = positive_f32(key, &value)?,
            "max_episode_steps" => {
                self.max_episode_steps = value
                    .as_i64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| GymError::InvalidConfig(format!("max_episode_steps must be a u32, got {value:?}")))?;
            }
            _ => return Err(GymError::Attribute(key.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_round_trip() {
        let mut env = CartPoleEnv::default();
        env.set_attr("gravity", InfoValue::F64(3.5)).unwrap();
        assert_eq!(env.get_attr("gravity"), Some(InfoValue::F64(3.5)));
        env.set_attr("max_episode_steps", InfoValue::I64(7)).unwrap();
        assert_eq!(env.get_attr("max_episode_steps"), Some(InfoValue::I64(7)));
    }

    #[test]
    fn read_only_and_unknown_attributes_are_rejected() {
        let mut env = CartPoleEnv::default();
        assert!(matches!(env.set_attr("steps", InfoValue::I64(3)), Err(GymError::Attribute(k)) if k == "steps"));
        assert!(matches!(env.set_attr("nope", InfoValue::I64(3)), Err(GymError::Attribute(_))));
        assert!(env.get_attr("nope").is_none());
        assert!(env.set_attr("gravity", InfoValue::F64(-1.0)).is_err());
    }

    #[test]
    fn truncates_at_max_episode_steps() {
        let mut env = CartPoleEnv::new(0);
        env.max_episode_steps = 3;
        env.reset(Some(0));
        let mut last = None;
        for a in [1, 0, 1] {
            last = Some(env.step(a));
        }
        let last = last.unwrap();
        assert!(last.truncated || last.terminated);
    }
}
