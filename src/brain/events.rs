use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::brain::controller::{ControlStatus, Controller};
use crate::brain::state::SystemMode;
use crate::io::device_store::attributes::{OCCUPIED_HEATING_SETPOINT, SYSTEM_MODE};
use crate::io::device_store::{from_centi_celsius, AttributeChange, Cluster, DeviceStateStore, Endpoint, WriteSource};
use crate::time_util::mytime::TimeProvider;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
pub enum ControlEvent {
    Tick,
    SetpointChanged { celsius: f64, source: WriteSource },
    ModeChanged { mode: SystemMode, source: WriteSource },
    /// Re-read the clock and recompute.
    Reset,
    Status(oneshot::Sender<ControlStatus>),
}

#[derive(Debug)]
pub struct ControllerGone;

/// Cheap to clone. Every trigger reaches the controller through one of these.
#[derive(Clone)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControlEvent>,
}

impl ControllerHandle {
    pub fn channel() -> (Self, mpsc::Receiver<ControlEvent>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { sender }, receiver)
    }

    pub async fn send(&self, event: ControlEvent) -> Result<(), ControllerGone> {
        self.sender.send(event).await.map_err(|_| ControllerGone)
    }

    pub async fn tick(&self) -> Result<(), ControllerGone> {
        self.send(ControlEvent::Tick).await
    }

    pub async fn reset(&self) -> Result<(), ControllerGone> {
        self.send(ControlEvent::Reset).await
    }

    pub async fn status(&self) -> Result<ControlStatus, ControllerGone> {
        let (reply, response) = oneshot::channel();
        self.send(ControlEvent::Status(reply)).await?;
        response.await.map_err(|_| ControllerGone)
    }
}

/// Handle events until every handle is dropped. A failure is logged and the
/// next event is handled as normal.
pub async fn run<T: TimeProvider>(mut controller: Controller<T>, mut receiver: mpsc::Receiver<ControlEvent>) {
    info!("Controller running");
    while let Some(event) = receiver.recv().await {
        debug!("Handling {:?}", event);
        if let Err(failure) = controller.handle(event).await {
            error!("Control failure: {}", failure);
        }
    }
    info!("Controller stopped, no more handles");
}

pub fn spawn_ticker(handle: ControllerHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if handle.tick().await.is_err() {
                return;
            }
        }
    })
}

/// Turns store changes to the setpoint and mode into events, keeping the write source.
pub fn spawn_attribute_forwarders(store: &dyn DeviceStateStore, handle: ControllerHandle) -> Vec<JoinHandle<()>> {
    let setpoints = {
        let mut subscription = store.subscribe(Endpoint::Thermostat, Cluster::Thermostat, OCCUPIED_HEATING_SETPOINT);
        let handle = handle.clone();
        tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                let Some(event) = setpoint_event(&change) else {
                    warn!("Ignoring unreadable setpoint {}", change.value);
                    continue;
                };
                if handle.send(event).await.is_err() {
                    return;
                }
            }
        })
    };

    let modes = {
        let mut subscription = store.subscribe(Endpoint::Thermostat, Cluster::Thermostat, SYSTEM_MODE);
        tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                let Some(event) = mode_event(&change) else {
                    warn!("Ignoring unsupported system mode {}", change.value);
                    continue;
                };
                if handle.send(event).await.is_err() {
                    return;
                }
            }
        })
    };

    vec![setpoints, modes]
}

fn setpoint_event(change: &AttributeChange) -> Option<ControlEvent> {
    from_centi_celsius(&change.value).map(|celsius| ControlEvent::SetpointChanged {
        celsius,
        source: change.source,
    })
}

fn mode_event(change: &AttributeChange) -> Option<ControlEvent> {
    change
        .value
        .as_i64()
        .and_then(SystemMode::from_attribute_value)
        .map(|mode| ControlEvent::ModeChanged { mode, source: change.source })
}
