//! Session bridging: lifecycle, replay buffer, observer fan-out.

mod bridge;
pub mod manager;
mod observers;
mod pump;
mod state;
pub mod types;

pub use bridge::Session;
pub use manager::SessionManager;
pub use observers::ObserverSender;
pub use pump::PumpCompletion;
pub use types::{ObserverFrame, ObserverId, SessionError, SessionInfo, SessionOptions};
