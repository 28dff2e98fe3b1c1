use crate::queue::AuditQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: AuditQueue,
}

impl AppState {
    pub fn new(queue: AuditQueue) -> Self {
        Self { queue }
    }
}
