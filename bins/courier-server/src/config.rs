use clap::{Args, Parser, Subcommand};

use courier_engine::service::DEFAULT_LIST_LIMIT;

#[derive(Parser)]
#[command(name = "courier-server", about = "Store, publish and consume messages")]
pub struct Cli {
    /// Path to TOML configuration file. Missing file means defaults.
    #[arg(long, global = true, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the consumer until SIGINT/SIGTERM.
    Serve,
    /// Store a message and publish it.
    Submit(SubmitArgs),
    /// Print the number of processed messages.
    Stats,
    /// Print a page of messages ordered by id.
    List(ListArgs),
    /// Print one message.
    Get(GetArgs),
}

#[derive(Args, Clone, Debug)]
pub struct SubmitArgs {
    /// Message content.
    pub content: String,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub offset: i64,
    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT, allow_negative_numbers = true)]
    pub limit: i64,
}

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    pub id: u64,
}
