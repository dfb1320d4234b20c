pub mod channel;
pub mod config;
pub mod error;
pub mod job;
pub mod poll;
pub mod progress;

pub mod prelude {
    pub use crate::channel::{relay, RelayReceiver, RelaySender};
    pub use crate::config::RelayConfig;
    pub use crate::error::*;
    pub use crate::job::{spawn_job, WorkerHandle, Workload};
    pub use crate::poll::{PollLoop, RelayState, TickReport};
    pub use crate::progress::*;
}
