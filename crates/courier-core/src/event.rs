use courier_api::types::ChatEvent;
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<ChatEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}
