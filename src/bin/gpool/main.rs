use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

#[cfg(target_arch = "x86_64")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gpool = cli::GPool::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = gpool::config::load_config(gpool.config.as_ref())?;

    commands::handle_commands(&config, &gpool).await
}
