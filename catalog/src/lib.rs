pub use {
    policy::PlatformPolicy,
    prices::PriceBook,
    reasons::ReasonCatalog,
    registry::{Deliverable, ModuleContract, ModuleKind, ModuleRegistry, Ports, Requirements},
    secrets::SecretStore,
};

pub mod policy;
pub mod prices;
pub mod reasons;
pub mod registry;
pub mod secrets;
