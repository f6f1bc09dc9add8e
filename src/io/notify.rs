use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

pub const SYSTEM_UPDATED: &str = "systemUpdated";

/// The externally visible summary published after every control loop pass.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemUpdate {
    pub system_mode: u8,
    pub current_hour: u32,
    pub target_temperature: f64,
    pub flow_temperature: f64,
    pub power: i64,
    pub active_schedule_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    event: &'static str,
    payload: SystemUpdate,
}

impl Notification {
    pub fn get_event(&self) -> &'static str {
        self.event
    }

    pub fn get_payload(&self) -> &SystemUpdate {
        &self.payload
    }
}

/// Fire-and-forget fan out to whoever is listening.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, payload: SystemUpdate) {
        let notification = Notification {
            event: SYSTEM_UPDATED,
            payload,
        };
        // Nobody listening is fine.
        if let Ok(receivers) = self.sender.send(notification) {
            trace!("Published {} to {} receivers", SYSTEM_UPDATED, receivers);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}
