pub mod cart_pole;
pub mod pendulum;

pub use cart_pole::CartPoleEnv;
pub use pendulum::PendulumEnv;
