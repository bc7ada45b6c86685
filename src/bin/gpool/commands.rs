pub mod completions;
pub mod dispatch;
pub mod jobs;
pub mod join;
pub mod key;
pub mod remove;
pub mod resources;
pub mod user;

use anyhow::anyhow;
use gpool::config::Config;
use gpool::core::user::RequestUser;

use crate::cli::{Commands, GPool, KeyCommands, UserCommands};

pub async fn handle_commands(config: &Config, gpool: &GPool) -> anyhow::Result<()> {
    match &gpool.commands {
        Commands::Join(args) => join::handle_join(config, args).await,
        Commands::Resources => {
            resources::handle_resources(config, &request_user(config, gpool)?).await
        }
        Commands::Dispatch(args) => {
            dispatch::handle_dispatch(config, &request_user(config, gpool)?, args).await
        }
        Commands::Jobs => jobs::handle_jobs(config, &request_user(config, gpool)?).await,
        Commands::Remove(args) => {
            remove::handle_remove(config, &request_user(config, gpool)?, args).await
        }
        Commands::User(UserCommands::Register(args)) => {
            user::handle_register(config, &request_user(config, gpool)?, args).await
        }
        Commands::User(UserCommands::Permission(args)) => {
            user::handle_permission(config, &request_user(config, gpool)?, args).await
        }
        Commands::Key(KeyCommands::Set(args)) => {
            key::handle_set(config, &request_user(config, gpool)?, args).await
        }
        Commands::Key(KeyCommands::Check) => {
            key::handle_check(config, &request_user(config, gpool)?).await
        }
        Commands::Completions(args) => completions::handle_completions(args),
    }
}

/// Identity claims attached to every gated request: CLI flags override the
/// `[identity]` config section.
fn request_user(config: &Config, gpool: &GPool) -> anyhow::Result<RequestUser> {
    let user_id = gpool
        .user_id
        .clone()
        .or_else(|| config.identity.user_id.clone())
        .ok_or_else(|| {
            anyhow!("no acting user: set [identity].user_id in gpool.toml or pass --user-id")
        })?;

    Ok(RequestUser {
        user_id,
        username: gpool
            .username
            .clone()
            .or_else(|| config.identity.username.clone()),
        full_name: config.identity.full_name.clone(),
    })
}
