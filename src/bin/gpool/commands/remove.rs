use anyhow::Result;

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::user::RequestUser;

use crate::cli::RemoveArgs;

pub(crate) async fn handle_remove(
    config: &Config,
    user: &RequestUser,
    args: &RemoveArgs,
) -> Result<()> {
    let client = Client::build(config)?;
    client.remove_job(user, args.id).await?;
    println!("Job {} removed.", args.id);
    Ok(())
}
