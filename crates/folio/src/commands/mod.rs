//! CLI subcommands.

pub mod build;
pub mod deploy;
pub mod init;
pub mod run;
