use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gpoold", version = gpool::version(), about = "GPU pool manager daemon", styles = gpool::utils::STYLES)]
pub struct GPoold {
    /// The configuration file to use
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}
