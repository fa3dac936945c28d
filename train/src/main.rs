use anyhow::Result;
use std::{env, sync::Arc};
use structopt::StructOpt;
use tracing::{trace_span, Instrument};
use tracing_subscriber::prelude::*;
use train::config::{Args, Config};

#[tokio::main]
pub async fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = train::utils::env_filter(env::var("RUST_LOG").ok().as_deref())?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let args = Args::from_args();
    let config = Arc::new(Config::new(args)?);

    // start training program
    train::start(config)
        .instrument(trace_span!("train"))
        .await?;

    Ok(())
}
