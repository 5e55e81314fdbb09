//! Reinforcement learning: policy and value networks, experience
//! storage, and the PPO trainer.

pub mod policy;
pub mod trainer;
pub mod trajectory;

pub use policy::{PolicyNetwork, ValueNetwork};
pub use trainer::{PpoTrainer, UpdateReport, clipped_surrogate, compute_gae};
pub use trajectory::{Transition, TrajectoryBuffer};
