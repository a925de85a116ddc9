/// Training infrastructure for re-ID models

pub mod dispatch;
pub mod freeze;
pub mod meters;
pub mod trainer;

pub use dispatch::{ForwardDispatcher, ForwardOutput};
pub use freeze::apply_bn_freeze;
pub use meters::{margin_satisfaction, EpochMeters, MetricMeters, RunningStatistic};
pub use trainer::Trainer;
