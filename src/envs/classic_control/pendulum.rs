use crate::core::{Env, GymError, Info, InfoValue, RenderFrame, Result, Step};
use crate::spaces::{BoxSpace, SpaceSpec};
use crate::utils::rng::{rng_from_seed, RngStream};
use rand::distributions::Distribution;

/// Pendulum-v1 classic control environment
/// State: angle (theta, radians), angular velocity (theta_dot)
/// Observation: [cos(theta), sin(theta), theta_dot]
/// Action: Box([-max_torque], [max_torque]), the applied torque
/// Reward: -(theta_norm^2 + 0.1 * theta_dot^2 + 0.001 * torque^2)
/// Episode: no natural termination; truncated at max_episode_steps
pub struct PendulumEnv {
    theta: f32,
    theta_dot: f32,

    pub max_episode_steps: u32,
    steps: u32,

    rng: RngStream,

    // constants
    g: f32,
    m: f32,
    l: f32,
    max_speed: f32,
    max_torque: f32,
    dt: f32,
}

impl Default for PendulumEnv { fn default() -> Self { Self::new(42) } }

impl PendulumEnv {
    pub fn new(seed: u64) -> Self {
        Self {
            theta: 0.0,
            theta_dot: 0.0,
            max_episode_steps: 200,
            steps: 0,
            rng: rng_from_seed(seed),
            g: 10.0,
            m: 1.0,
            l: 1.0,
            max_speed: 8.0,
            max_torque: 2.0,
            dt: 0.05,
        }
    }

    fn obs(&self) -> [f32; 3] {
        [self.theta.cos(), self.theta.sin(), self.theta_dot]
    }

    #[inline]
    fn angle_normalize(x: f32) -> f32 {
        let pi = std::f32::consts::PI;
        ((x + pi) % (2.0 * pi) + (2.0 * pi)) % (2.0 * pi) - pi
    }
}

impl Env for PendulumEnv {
    type Obs = [f32; 3];
    type Act = f32;

    fn reset(&mut self, seed: Option<u64>) -> (Self::Obs, Info) {
        if let Some(s) = seed { self.rng = rng_from_seed(s); }
        // theta ~ U[-pi, pi], theta_dot ~ U[-1, 1]
        let u_theta = rand::distributions::Uniform::new_inclusive(-std::f32::consts::PI, std::f32::consts::PI);
        let u_vel = rand::distributions::Uniform::new_inclusive(-1.0f32, 1.0f32);
        self.theta = u_theta.sample(&mut self.rng);
        self.theta_dot = u_vel.sample(&mut self.rng);
        self.steps = 0;
        (self.obs(), Info::new())
    }

    fn step(&mut self, action: Self::Act) -> Step<Self::Obs> {
        let torque = action.clamp(-self.max_torque, self.max_torque);
        let (g, m, l, dt) = (self.g, self.m, self.l, self.dt);

        // theta_ddot = (3g/(2l)) * sin(theta) + (3/(m l^2)) * u
        let theta_ddot = (3.0 * g / (2.0 * l)) * self.theta.sin() + (3.0 / (m * l * l)) * torque;
        self.theta_dot = (self.theta_dot + theta_ddot * dt).clamp(-self.max_speed, self.max_speed);
        self.theta = Self::angle_normalize(self.theta + self.theta_dot * dt);

        self.steps += 1;
        let cost = self.theta * self.theta + 0.1 * self.theta_dot * self.theta_dot + 0.001 * torque * torque;
        let truncated = self.steps >= self.max_episode_steps;
        Step::new(self.obs(), -cost, false, truncated, Info::new())
    }

    fn action_space(&self) -> SpaceSpec {
        BoxSpace::new(vec![-self.max_torque], vec![self.max_torque]).into()
    }

    fn observation_space(&self) -> SpaceSpec {
        BoxSpace::new(vec![-1.0, -1.0, -self.max_speed], vec![1.0, 1.0, self.max_speed]).into()
    }

    fn render(&self) -> Option<RenderFrame> {
        Some(RenderFrame::Text(format!("pendulum theta={:.3} theta_dot={:.3}", self.theta, self.theta_dot)))
    }

    fn get_attr(&self, key: &str) -> Option<InfoValue> {
        match key {
            "g" => Some(self.g.into()),
            "max_torque" => Some(self.max_torque.into()),
            "max_episode_steps" => Some(self.max_episode_steps.into()),
            _ => None,
        }
    }

    fn set_attr(&mut self, key: &str, value: InfoValue) -> Result<()> {
        let bad = || GymError::InvalidConfig(format!("{key} got unusable value {value:?}"));
        match key {
            "g" => self.g = value.as_f64().ok_or_else(bad)? as f32,
            "max_torque" => self.max_torque = value.as_f64().filter(|v| *v > 0.0).ok_or_else(bad)? as f32,
            "max_episode_steps" => {
                self.max_episode_steps = value.as_i64().and_then(|v| u32::try_from(v).ok()).ok_or_else(bad)?;
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
    fn torque_is_clipped_and_reward_non_positive() {
        let mut env = PendulumEnv::new(1);
        env.reset(Some(1));
        for _ in 0..10 {
            let s = env.step(100.0);
            assert!(s.reward <= 0.0);
            assert!(s.observation[2].abs() <= 8.0 + 1e-6);
        }
    }

    #[test]
    fn action_space_follows_max_torque_attribute() {
        let mut env = PendulumEnv::default();
        env.set_attr("max_torque", InfoValue::F64(1.5)).unwrap();
        match env.action_space() {
            SpaceSpec::Box(b) => assert_eq!(b.high().to_vec(), vec![1.5f32]),
            other => panic!("unexpected space {other:?}"),
        }
    }
}
