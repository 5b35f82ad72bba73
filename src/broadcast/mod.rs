//! Real-time fan-out of ledger changes.
//!
//! - `channel`: channel naming and parsing
//! - `gateway`: non-blocking publish/subscribe over named channels

pub mod channel;
pub mod gateway;

pub use channel::{Channel, ChannelError, GLOBAL_CHANNEL};
pub use gateway::{BroadcastGateway, Delivery, DEFAULT_CAPACITY};
