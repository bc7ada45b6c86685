use anyhow::{Context, Result};

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::permission::PermissionLevel;
use gpool::core::user::RequestUser;

use crate::cli::{PermissionArgs, UserTargetArgs};

pub(crate) async fn handle_register(
    config: &Config,
    user: &RequestUser,
    args: &UserTargetArgs,
) -> Result<()> {
    let client = Client::build(config)?;
    client.register_user(user, &args.target).await?;
    println!("User {} registered.", args.target);
    Ok(())
}

pub(crate) async fn handle_permission(
    config: &Config,
    user: &RequestUser,
    args: &PermissionArgs,
) -> Result<()> {
    let level: PermissionLevel = args
        .level
        .parse()
        .with_context(|| format!("invalid level {:?}: expected owner, admin or user", args.level))?;

    let client = Client::build(config)?;
    client.set_permission(user, &args.target, level).await?;
    println!("User {} is now {}.", args.target, level);
    Ok(())
}
