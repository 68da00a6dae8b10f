pub mod monitor_actor;
pub mod supervisor;

pub use common::actors::{Actor, ActorType, ControlMessage};
pub use monitor_actor::SignalMonitorActor;
pub use supervisor::Supervisor;
