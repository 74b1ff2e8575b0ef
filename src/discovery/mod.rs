//! Candidate discovery.
//!
//! Queries the hosting platform for open pull requests across the
//! configured sources and keeps the recently updated ones. A failing
//! source is logged and skipped; the others still contribute.

mod discoverer;
mod github;
mod platform;

pub use discoverer::{Discoverer, DiscoveryFilter};
pub use github::{GITHUB_API_URL, GitHubPlatform};
pub use platform::{HostingPlatform, RemoteItem, RemoteRepository, StaticPlatform};
