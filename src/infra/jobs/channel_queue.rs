use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::moderation::{BouncerError, Job, JobQueue};

/// Job queue backed by a bounded tokio channel. The worker's job runner owns
/// the receiving end.
#[derive(Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<Job>,
}

impl ChannelJobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), BouncerError> {
        self.sender
            .send(job)
            .await
            .map_err(|e| BouncerError::Queue(format!("job runner is gone: {:?}", e.0)))
    }
}
