// Worker layer - drives the bouncers from host events, the job queue and timers

#[path = "intake.rs"]
pub mod intake;
#[path = "job_runner.rs"]
pub mod job_runner;
#[path = "lifecycle.rs"]
pub mod lifecycle;
#[path = "pipeline.rs"]
pub mod pipeline;
#[path = "review.rs"]
pub mod review;
#[path = "sweeps.rs"]
pub mod sweeps;

pub use intake::HostEventIntake;
pub use pipeline::Pipeline;
