use crate::config::Cli;
use crate::error::ServerError;

pub async fn run(cli: &Cli) -> Result<(), ServerError> {
    tracing::info!("courier-server starting");

    let mut runtime = super::bootstrap(cli).await?;
    runtime.start_consumer().await?;
    tracing::info!(
        topic = %runtime.config().broker.topic,
        group = %runtime.config().broker.group,
        "server ready"
    );

    let report = runtime.run_until_signal().await;
    ServerError::check_shutdown(report)
}
