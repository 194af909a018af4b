//! CLI command implementations

pub mod check;
pub mod config;
pub mod plan;

pub use check::execute as check;
pub use config::execute as config;
pub use plan::execute as plan;

use crate::builder::CompositionBuilder;
use crate::config::Config;
use crate::container::Container;
use crate::error::ComposeResult;
use crate::manifest::Manifest;
use std::path::Path;

/// Load a manifest and the engine it should be planned or checked with
async fn load_manifest(
    path: &Path,
    config: &Config,
    allow_unknown_contracts: bool,
) -> ComposeResult<(Container, CompositionBuilder)> {
    let manifest = Manifest::from_file(path).await?;
    let mut engine = CompositionBuilder::from_config(&config.engine)
        .with_contracts(manifest.contract_registry()?);
    if allow_unknown_contracts {
        engine = engine.allow_unknown_contracts(true);
    }
    Ok((manifest.container()?, engine))
}
