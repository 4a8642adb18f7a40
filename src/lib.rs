//! makeavail - Temporary interactive access to a remote encrypted tree
//!
//! This library stages a remote sshfs mount and an encfs view on top of
//! it, runs an interactive shell in the decrypted tree, optionally
//! refreshes a checksum manifest, and releases every mount and directory
//! in reverse order afterwards.

pub mod checksum;
pub mod config;
pub mod error;
pub mod mount;
pub mod run;
pub mod session;
pub mod stack;
pub mod tools;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, MountSpec};
    pub use crate::error::{Error, Result};
    pub use crate::run::{run, RunReport};
    pub use crate::stack::ResourceStack;
    pub use crate::tools::{SystemTools, Tools};
}
