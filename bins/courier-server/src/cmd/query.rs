use crate::config::{Cli, GetArgs, ListArgs};
use crate::error::ServerError;

pub async fn stats(cli: &Cli) -> Result<(), ServerError> {
    let runtime = super::bootstrap(cli).await?;
    let processed = runtime.service().processed_count().await?;
    super::print_json(&serde_json::json!({ "processed_messages": processed }))
}

pub async fn list(cli: &Cli, args: &ListArgs) -> Result<(), ServerError> {
    let runtime = super::bootstrap(cli).await?;
    let messages = runtime.service().list(args.offset, args.limit).await?;
    super::print_json(&messages)
}

pub async fn get(cli: &Cli, args: &GetArgs) -> Result<(), ServerError> {
    let runtime = super::bootstrap(cli).await?;
    let message = runtime.service().get(args.id).await?;
    super::print_json(&message)
}
