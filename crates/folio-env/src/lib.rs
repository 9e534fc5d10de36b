//! Environment declaration files and pinned tool versions.
//!
//! This crate reads the small key/value file that pins the documentation
//! generator version, using the same rules a shell applies when sourcing it.

pub mod envfile;
pub mod version;

pub use envfile::{parse_env, EnvError, EnvFile};
pub use version::PinnedVersion;
