// In-process job queue.

pub mod channel_queue;

pub use channel_queue::ChannelJobQueue;
