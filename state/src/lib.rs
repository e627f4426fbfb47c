pub use {
    status::{StatusInputs, StepStatus, WorkOrderStatus, reduce},
    store::{RunRow, RunStateStore, StepRunRow},
};

pub mod status;
pub mod store;
