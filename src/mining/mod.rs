//! Mining module: block templates, the task controller and found blocks

pub mod clock;
pub mod controller;
pub mod mempool;
pub mod processor;
pub mod session;
pub mod task;
pub mod template;

#[cfg(test)]
pub(crate) mod fixtures;

pub use clock::{NetworkClock, SystemClock};
pub use controller::{
    assemble_template, confirmations, pick_address, Assembly, ControllerError, ControllerFlags,
    ControllerHandle, ControllerState, MinerSettings, MiningController, FOUND_BLOCK_COOLDOWN,
    TASK_REFRESH_INTERVAL,
};
pub use mempool::{Mempool, MempoolEntry, MempoolError, MempoolStats};
pub use processor::{BlockProcessor, FoundBlock, ProcessorError};
pub use session::{MiningStats, Session};
pub use task::MiningTask;
pub use template::{BlockTemplate, TemplateError, PAYOUT_SLOT};
