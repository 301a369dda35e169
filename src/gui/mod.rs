//! Terminal screens for picking a rig and watching a session.

mod device_selector;
mod error;
mod session_monitor;

pub use device_selector::device_selector;
pub use error::GuiError;
pub use session_monitor::monitor_session;
