use anyhow::{Context, Result};

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::user::RequestUser;

use crate::cli::KeySetArgs;

pub(crate) async fn handle_set(
    config: &Config,
    user: &RequestUser,
    args: &KeySetArgs,
) -> Result<()> {
    let key = std::fs::read_to_string(&args.key_file)
        .with_context(|| format!("Failed to read key file {:?}", args.key_file))?;
    let key = key.trim();

    let client = Client::build(config)?;
    client.set_credential(user, key).await?;
    println!("Key stored.");
    Ok(())
}

pub(crate) async fn handle_check(config: &Config, user: &RequestUser) -> Result<()> {
    let client = Client::build(config)?;
    if client.check_credential(user).await? {
        println!("A key is stored for you.");
    } else {
        println!("No key stored; run `gpool key set <file>` first.");
    }
    Ok(())
}
