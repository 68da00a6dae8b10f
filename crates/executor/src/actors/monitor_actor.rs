use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::actors::{Actor, ActorType, ControlMessage};
use crate::services::signal_monitor::SignalMonitor;

/// Drives [`SignalMonitor::process_tick`] on a fixed interval.
/// Monitor state lives in the shared `SignalMonitor`, so a restart keeps it.
pub struct SignalMonitorActor {
    monitor: Arc<SignalMonitor>,
    tick: Duration,
}

impl SignalMonitorActor {
    pub fn new(monitor: Arc<SignalMonitor>, tick: Duration) -> Self {
        Self { monitor, tick }
    }
}

#[async_trait]
impl Actor for SignalMonitorActor {
    fn name(&self) -> ActorType {
        ActorType::SignalMonitorActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        info!("Starting Signal Monitor (tick every {:?})", self.tick);

        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let trades = self.monitor.process_tick().await;
            if trades > 0 {
                info!("Signal monitor tick executed {} trades", trades);
            } else {
                debug!("Signal monitor tick done");
            }

            if supervisor_tx.is_closed() {
                heartbeat_handle.abort();
                info!("Supervisor gone, stopping Signal Monitor");
                return Ok(());
            }
        }
    }
}
