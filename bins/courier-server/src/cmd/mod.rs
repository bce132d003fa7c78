pub mod query;
pub mod serve;
pub mod submit;

use courier_engine::Runtime;
use courier_engine::config::CourierConfig;

use crate::backends;
use crate::config::Cli;
use crate::error::ServerError;

/// Load config, build backends and bootstrap. Shared by every command.
pub(crate) async fn bootstrap(cli: &Cli) -> Result<Runtime, ServerError> {
    let config = CourierConfig::from_sources(&cli.config)?;
    tracing::debug!(config = %cli.config, ?config, "configuration loaded");
    let backends = backends::build(&config)?;
    Ok(Runtime::bootstrap(config, backends).await?)
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ServerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
