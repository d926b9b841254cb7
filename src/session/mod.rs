pub mod ledger;
pub mod lifecycle;
pub mod manager;

pub use lifecycle::HostSignal;
pub use manager::{ManagerConfig, SessionManager};
