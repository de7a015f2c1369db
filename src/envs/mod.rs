pub mod classic_control;

pub use classic_control::{CartPoleEnv, PendulumEnv};
