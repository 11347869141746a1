pub mod access;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod idgen;
pub mod interrupt;
pub mod module;
pub mod notification_queue;
pub mod pipe;
pub mod ring;
pub mod store;

// Re-export error types for convenience
pub use error::{DevError, Result};

// Re-export configuration types
pub use config::{ModuleParams, SharedTunables, Tunables};

// Re-export caller context types
pub use context::{Capabilities, Credentials, OpenContext, OpenFlags, SessionKey};
pub use interrupt::Interrupt;

// Re-export block store and access policies
pub use access::{AccessDevice, AccessPolicy, Cloned, Exclusive, SameUser, SameUserBlocking};
pub use store::{Device, DeviceFile, Geometry};

// Re-export control surface
pub use control::{Command, Control, Param, Verb};

// Re-export pipe types
pub use pipe::{PipeDevice, PipeFile, Readiness};
pub use ring::RingBuffer;

// Re-export idgen types for convenience
pub use idgen::{Handle, IntCanBeHandle};

pub use module::Memdev;
