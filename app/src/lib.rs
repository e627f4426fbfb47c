pub use {
    executor::{
        Context, EngineConfig, EntryOutcome, KindTimeouts, Orchestrator, QueueSummary, Stores,
    },
    invoke::{
        CancelHandle, CancelToken, InvokeRequest, ModuleOutcome, ModuleRun, ModuleStatus,
        ModuleTable, cancel_pair,
    },
    publish::{NoopPublisher, PublishRequest, Publisher},
    workorder::{ExecutionMode, InputSpec, StepDoc, WorkOrderDoc},
};

pub mod binder;
pub mod evidence;
pub mod executor;
pub mod invoke;
pub mod planner;
pub mod preflight;
pub mod publish;
pub mod queue;
pub mod refunds;
pub mod workorder;
