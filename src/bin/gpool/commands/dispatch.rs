use anyhow::{anyhow, bail, Result};

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::job::{JobRequest, MountSpec};
use gpool::core::user::RequestUser;
use gpool::utils::parse_gpu_indices;

use crate::cli::DispatchArgs;

pub(crate) async fn handle_dispatch(
    config: &Config,
    user: &RequestUser,
    args: &DispatchArgs,
) -> Result<()> {
    let client = Client::build(config)?;

    let gpu_uuids = resolve_gpus(&client, user, &args.worker, &args.gpus).await?;
    let mounts = args
        .mounts
        .iter()
        .map(|m| parse_mount(m))
        .collect::<Result<Vec<_>>>()?;

    let job = client
        .dispatch(
            user,
            JobRequest {
                image: args.image.clone(),
                worker_hostname: args.worker.clone(),
                gpu_uuids,
                duration_hours: args.hours,
                mounts,
            },
        )
        .await?;

    println!(
        "Job {} ({}) dispatched to {} until {}",
        job.id,
        job.name,
        job.worker_hostname,
        job.expected_end_time.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

/// GPUs can be named by uuid directly, or by index against the worker's
/// current free listing.
async fn resolve_gpus(
    client: &Client,
    user: &RequestUser,
    worker: &str,
    gpus: &str,
) -> Result<Vec<String>> {
    let tokens: Vec<&str> = gpus.split(',').map(str::trim).collect();
    if tokens.iter().all(|t| t.starts_with("GPU-")) {
        return Ok(tokens.into_iter().map(str::to_string).collect());
    }

    let indices = parse_gpu_indices(gpus)?;
    let view = client.resources(user).await?;
    let free = view
        .gpus
        .get(worker)
        .ok_or_else(|| anyhow!("worker {worker} is not online"))?;

    indices
        .into_iter()
        .map(|index| {
            free.iter()
                .find(|gpu| gpu.index == index)
                .map(|gpu| gpu.uuid.clone())
                .ok_or_else(|| anyhow!("GPU {index} on {worker} is busy or unknown"))
        })
        .collect()
}

fn parse_mount(mount: &str) -> Result<MountSpec> {
    let Some((source, target)) = mount.split_once(':') else {
        bail!("invalid mount {mount:?}: expected source:target");
    };
    if source.is_empty() || target.is_empty() {
        bail!("invalid mount {mount:?}: expected source:target");
    }
    Ok(MountSpec {
        source: source.to_string(),
        target: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount() {
        let mount = parse_mount("nfs/u1:/data").unwrap();
        assert_eq!(mount.source, "nfs/u1");
        assert_eq!(mount.target, "/data");

        assert!(parse_mount("no-separator").is_err());
        assert!(parse_mount(":/data").is_err());
        assert!(parse_mount("src:").is_err());
    }
}
