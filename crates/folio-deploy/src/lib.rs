//! Deploy stage for folio.
//!
//! Publishes a packaged artifact to a hosting platform using a short-lived
//! identity token that is requested per deploy and never stored.

pub mod deployer;
pub mod directory;
pub mod error;
pub mod http;
pub mod platform;
pub mod token;

pub use deployer::{DeployConfig, Deployer, Deployment};
pub use directory::DirectoryPlatform;
pub use error::DeployError;
pub use http::HttpPlatform;
pub use platform::HostingPlatform;
pub use token::{EnvOidcTokenSource, IdToken, OidcTokenSource, StaticTokenSource, TokenSource};
