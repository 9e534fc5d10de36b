//! Build stage for folio.
//!
//! Turns a book source tree into a deployable artifact: resolve the pinned
//! generator version, provision that exact version, render the book, overlay
//! the static assets and package the result.

pub mod artifact;
pub mod assets;
pub mod builder;
pub mod command;
pub mod error;
pub mod generator;
pub mod provision;
pub mod source;

pub use artifact::{package, Artifact, ArtifactMeta};
pub use assets::{copy_assets, AssetReport};
pub use builder::{BuildConfig, BuildResult, BuildStage, BuildStep, Workspace};
pub use error::{BuildError, ErrorKind};
pub use generator::{Generator, MdBook};
pub use provision::{CargoProvisioner, PathProvisioner, ProvisionedTool, Provisioner};
pub use source::{inspect_source, SourceInfo};
