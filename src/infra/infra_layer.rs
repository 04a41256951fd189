// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "antispam/mod.rs"]
pub mod antispam;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "jobs/mod.rs"]
pub mod jobs;
