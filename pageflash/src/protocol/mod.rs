//! Protocol implementations.

pub mod beacon;
pub mod checksum;
pub mod frame;
pub mod timing;
pub mod wake;

// Re-export common types
pub use beacon::{BEACON, wait_for_beacon};
pub use checksum::{command_checksum, page_checksum};
pub use frame::{ACK, PageFrame, PageNumbering};
pub use timing::transmit_time;
pub use wake::{WakeCommand, WakeConfig, send_wake};
