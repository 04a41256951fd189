// Core moderation module - the spam-check pipeline.
// Domain types, ports and the bouncers that drive targets through it.

pub mod bouncer;
pub mod comments_bouncer;
pub mod moderation_models;
pub mod moderation_ports;
pub mod posts_bouncer;
pub mod rate_limiter;
pub mod review_actions;
pub mod target_locks;
pub mod targets;
pub mod users_bouncer;

#[cfg(test)]
pub(crate) mod test_support;

pub use bouncer::*;
pub use comments_bouncer::*;
pub use moderation_models::*;
pub use moderation_ports::*;
pub use posts_bouncer::*;
pub use rate_limiter::*;
pub use review_actions::*;
pub use target_locks::*;
pub use targets::*;
pub use users_bouncer::*;
