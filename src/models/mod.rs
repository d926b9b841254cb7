pub mod pause;
pub mod session;

pub use pause::PauseReason;
pub use session::{generate_session_id, normalize_app_name, Ledger, SessionRecord};
