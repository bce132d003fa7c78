use crate::config::{Cli, SubmitArgs};
use crate::error::ServerError;

pub async fn run(cli: &Cli, args: &SubmitArgs) -> Result<(), ServerError> {
    let runtime = super::bootstrap(cli).await?;
    let result = runtime.service().submit(&args.content).await;
    // Reported, but it does not change the submit outcome.
    if let Err(e) = ServerError::check_shutdown(runtime.shutdown().await) {
        tracing::warn!(error = %e, "unclean shutdown after submit");
    }
    super::print_json(&result?)
}
