use anyhow::{Context, Result};
use nvml_wrapper::Nvml;

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::worker::{GpuSpec, WorkerSpec};

use crate::cli::JoinArgs;

/// Announce this machine to the manager: hostname, platform info and the
/// local GPU inventory. Run after the engine has joined the node (the
/// engine-assigned join id is passed on the command line).
pub(crate) async fn handle_join(config: &Config, args: &JoinArgs) -> Result<()> {
    let hostname = match &args.hostname {
        Some(hostname) => hostname.clone(),
        None => hostname::get()
            .context("Failed to determine hostname")?
            .to_string_lossy()
            .to_string(),
    };

    let gpus = match collect_gpus() {
        Ok(gpus) => gpus,
        Err(e) => {
            tracing::warn!(error = %e, "GPU inventory unavailable; joining without GPUs");
            vec![]
        }
    };

    let spec = WorkerSpec {
        hostname,
        external_ip: args.external_ip.clone(),
        join_id: args.join_id.clone(),
        storage_root: args.storage_root.clone(),
        gpus,
        info: platform_info(),
    };

    let client = Client::build(config)?;
    let worker = client.join(&spec).await?;

    println!(
        "Worker {} registered ({} GPUs)",
        worker.hostname,
        spec.gpus.len()
    );
    Ok(())
}

/// Inventory the local GPUs through NVML: durable uuid, index, name, memory
/// and clock info.
fn collect_gpus() -> Result<Vec<GpuSpec>> {
    let nvml = Nvml::init().context("Failed to initialize NVML")?;
    let count = nvml.device_count().context("Failed to count GPUs")?;

    let mut gpus = Vec::with_capacity(count as usize);
    for index in 0..count {
        let device = nvml
            .device_by_index(index)
            .with_context(|| format!("Failed to open GPU {index}"))?;

        let memory = device.memory_info().context("Failed to read GPU memory")?;

        use nvml_wrapper::enum_wrappers::device::Clock;
        let info = serde_json::json!({
            "core_clock_mhz": device.clock_info(Clock::Graphics).ok(),
            "memory_clock_mhz": device.clock_info(Clock::Memory).ok(),
        });

        gpus.push(GpuSpec {
            uuid: device.uuid().context("Failed to read GPU uuid")?,
            index,
            name: device.name().context("Failed to read GPU name")?,
            total_memory_mib: memory.total / (1024 * 1024),
            info,
        });
    }

    Ok(gpus)
}

fn platform_info() -> serde_json::Value {
    serde_json::json!({
        "platform": std::env::consts::OS,
        "architecture": std::env::consts::ARCH,
    })
}
