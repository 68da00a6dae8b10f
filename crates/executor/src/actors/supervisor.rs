use std::{collections::HashMap, time::Duration};
use tracing::{error, info, warn};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::actors::{Actor, ActorType, ControlMessage};

type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// Restarts any registered actor whose heartbeat goes quiet.
pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    pulses: HashMap<ActorType, Instant>,
    handles: HashMap<ActorType, JoinHandle<()>>,
    timeout: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            actor_factories: HashMap::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    pub async fn start(&mut self) {
        let mut check_interval = time::interval(Duration::from_secs(1));
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        for actor in actors {
            self.spawn_actor(actor, supervisor_tx.clone());
        }
        info!("Supervisor watching {} actors", self.handles.len());

        loop {
            tokio::select! {
                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Heartbeat(actor_type) => {
                            if self.handles.contains_key(&actor_type) {
                                self.pulses.insert(actor_type, Instant::now());
                            }
                        }
                        ControlMessage::Shutdown(actor_type) => {
                            warn!("{:?} is shutting down gracefully.", actor_type);
                            self.pulses.remove(&actor_type);
                            if let Some(handle) = self.handles.remove(&actor_type) {
                                handle.abort();
                            }
                        }
                        ControlMessage::Error(actor_type, error_msg) => {
                            error!("Actor {:?} reported error: {}", actor_type, error_msg);
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let dead_timeout = Instant::now() - self.timeout;

                    let dead_actors: Vec<ActorType> = self
                        .pulses
                        .iter()
                        .filter(|(actor, last)| {
                            **last < dead_timeout
                                || self.handles.get(*actor).is_some_and(|h| h.is_finished())
                        })
                        .map(|(actor, _)| *actor)
                        .collect();

                    for actor in dead_actors {
                        warn!("{:?} is unresponsive or exited! Restarting.", actor);
                        if let Some(handle) = self.handles.remove(&actor) {
                            handle.abort();
                        }
                        self.spawn_actor(actor, supervisor_tx.clone());
                    }
                }
            }
        }
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let mut new_actor = factory();
        let new_actor_handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(tx.clone()).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
                let _ = tx
                    .send(ControlMessage::Error(actor_type, e.to_string()))
                    .await;
            }
        });
        self.handles.insert(actor_type, new_actor_handle);
        self.pulses.insert(actor_type, Instant::now());
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
