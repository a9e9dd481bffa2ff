//! Homebase link supervision: wire protocol, request correlation, the
//! per-device supervisor task, and the device registry that owns them.

pub mod protocol;
pub mod registry;
pub mod requests;
pub mod supervisor;

pub use registry::DeviceRegistry;
pub use supervisor::{spawn_link, LinkHandle};
