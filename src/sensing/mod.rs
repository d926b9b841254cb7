pub mod controller;
pub mod detector;
pub mod loop_worker;

pub use controller::SensingController;
pub use detector::{
    CommandForegroundDetector, ForegroundAppDetector, NoopForegroundDetector, NoopTaskLookup,
    TaskLookup,
};
