//! # Genie Resolver
//!
//! Turns the loose identifiers a user passes for a model or a manifest into
//! something the engine can be launched with.
//!
//! ## Model identifiers
//!
//! ```text
//! "localhost"            -> http://127.0.0.1:<port from port-binding file>
//! "http://..."           -> unchanged
//! "/dir" (config.json)   -> unchanged
//! "yelp"                 -> hub snapshot copied into <models_dir>/yelp-tunein
//! anything else          -> ResolverError::UnsupportedModel
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use genie_resolver::{GeniePaths, HuggingFaceHub, ModelResolver, PortBinding};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let paths = GeniePaths::from_env(None);
//!     let hub = Arc::new(HuggingFaceHub::new(&paths.hub_cache_dir)?);
//!     let models = ModelResolver::new(hub, &paths.models_dir, PortBinding::new(&paths.port_file));
//!
//!     let model = models.resolve("yelp", false).await?;
//!     println!("{model}");
//!     Ok(())
//! }
//! ```

mod error;
mod hub;
mod manifest;
mod model;
mod paths;
mod port_binding;
mod tools;

pub use error::{ResolverError, Result};
pub use hub::{HuggingFaceHub, ModelHub, DEFAULT_HUB_ENDPOINT, HUB_ENDPOINT_ENV, HUB_TOKEN_ENV};
pub use manifest::{
    ManifestResolver, MANIFEST_BRANCH, MANIFEST_BUILD_TARGET, MANIFEST_REPO_DIR,
    MANIFEST_REPO_URL, MANIFEST_SUBDIR,
};
pub use model::{known_model, KnownModel, ModelResolver, ResolvedResource, KNOWN_MODELS, MODEL_MARKER_FILE};
pub use paths::{
    GeniePaths, HOME_ENV, INSTALL_DIR_ENV, MANIFEST_DIR_ENV, MODEL_DIR_ENV, PORT_FILE_ENV,
};
pub use port_binding::PortBinding;
pub use tools::{render_command, SystemToolRunner, ToolRunner};
