pub mod connectivity;
pub mod idle;

pub use connectivity::{ConnectivityChange, ConnectivityMonitor};
pub use idle::{ActivityEffect, IdleMonitor};
