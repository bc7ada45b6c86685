use clap::Parser;
use clap_complete::Shell;
use gpool::core::version;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpool", author, version = version(), about = "Reserve GPU workers and run time-boxed container jobs.", styles = gpool::utils::STYLES)]
pub struct GPool {
    #[command(subcommand)]
    pub commands: Commands,

    #[arg(long, global = true, help = "Path to the config file")]
    pub config: Option<PathBuf>,

    /// Acting user id (overrides [identity].user_id from the config)
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    /// Acting username (overrides [identity].username from the config)
    #[arg(long, global = true)]
    pub username: Option<String>,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Announce this machine (and its GPUs) to the manager
    Join(JoinArgs),
    /// List online workers and their free GPUs
    #[command(alias = "ls")]
    Resources,
    /// Dispatch a job onto a worker, pinning one or more GPUs
    #[command(alias = "run")]
    Dispatch(DispatchArgs),
    /// List your jobs with their live placement state
    Jobs,
    /// Remove a job and free its GPUs
    #[command(alias = "rm")]
    Remove(RemoveArgs),
    /// Manage registered users
    #[command(subcommand)]
    User(UserCommands),
    /// Manage your access credential
    #[command(subcommand)]
    Key(KeyCommands),
    /// Generate tab-completion scripts for your shell
    #[command(arg_required_else_help = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct JoinArgs {
    /// Join identity assigned by the orchestration engine
    #[arg(long)]
    pub join_id: String,

    /// Hostname to register under (default: this machine's hostname)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Externally reachable address of this worker
    #[arg(long)]
    pub external_ip: Option<String>,

    /// Shared-filesystem root exported by this worker, if any
    #[arg(long)]
    pub storage_root: Option<String>,
}

#[derive(Debug, Parser)]
pub struct DispatchArgs {
    /// Target worker hostname
    #[arg(short, long)]
    pub worker: String,

    /// Container image to run
    #[arg(short, long)]
    pub image: String,

    /// GPUs to pin: uuids (`GPU-...`) or indices (`0`, `0-1`, `0,2`)
    /// resolved against the free listing of the worker
    #[arg(short, long)]
    pub gpus: String,

    /// Reservation length in hours
    #[arg(long, default_value_t = 4)]
    pub hours: u32,

    /// Volume mounts as `source:target`; repeatable
    #[arg(long = "mount")]
    pub mounts: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// The ID of the job to remove
    pub id: i64,
}

#[derive(Debug, Parser)]
pub enum UserCommands {
    /// Register a user at plain user level (admin only)
    Register(UserTargetArgs),
    /// Set a user's permission level
    Permission(PermissionArgs),
}

#[derive(Debug, Parser)]
pub struct UserTargetArgs {
    /// Target user id
    pub target: String,
}

#[derive(Debug, Parser)]
pub struct PermissionArgs {
    /// Target user id
    pub target: String,

    /// Level to grant: owner, admin or user
    pub level: String,
}

#[derive(Debug, Parser)]
pub enum KeyCommands {
    /// Upload (or rotate) your public key
    Set(KeySetArgs),
    /// Check whether a key is stored for you
    Check,
}

#[derive(Debug, Parser)]
pub struct KeySetArgs {
    /// File containing the public key (e.g. ~/.ssh/id_ed25519.pub)
    pub key_file: PathBuf,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// The shell to generate the completions for
    pub shell: Shell,
}
