pub mod engine;
pub mod remote;

pub use engine::{RetryPolicy, SyncEngine, SyncOutcome};
pub use remote::{HttpRemoteStore, NoopRemoteStore, RemoteSessionRecord, RemoteStore, SyncError};
