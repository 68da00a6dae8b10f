use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
    SignalMonitorActor,
    NotifierActor,
}

/// Messages sent from Actors to the Supervisor
#[derive(Debug)]
pub enum ControlMessage {
    Heartbeat(ActorType),
    Shutdown(ActorType),
    Error(ActorType, String),
}

/// The trait that all restartable services must implement
#[async_trait]
pub trait Actor: Send + Sync {
    /// The unique name of the actor (e.g., "SignalMonitor")
    fn name(&self) -> ActorType;

    /// The main loop of the actor.
    /// It must periodically send `ControlMessage::Heartbeat` to the supervisor.
    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()>;

    fn spawn_heartbeat(&self, supervisor_tx: mpsc::Sender<ControlMessage>) -> JoinHandle<()> {
        let actor_type = self.name();
        tokio::spawn(async move {
            loop {
                if supervisor_tx
                    .send(ControlMessage::Heartbeat(actor_type))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }
}
