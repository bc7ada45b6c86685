use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::user::RequestUser;

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "WORKER")]
    worker: String,
    #[tabled(rename = "IDX")]
    index: u32,
    #[tabled(rename = "GPU")]
    name: String,
    #[tabled(rename = "MEMORY")]
    memory: String,
    #[tabled(rename = "UUID")]
    uuid: String,
}

pub(crate) async fn handle_resources(config: &Config, user: &RequestUser) -> Result<()> {
    let client = Client::build(config)?;
    let view = client.resources(user).await?;

    let mut rows: Vec<ResourceRow> = Vec::new();
    let mut hostnames: Vec<_> = view.gpus.keys().collect();
    hostnames.sort();

    for hostname in hostnames {
        for gpu in &view.gpus[hostname] {
            rows.push(ResourceRow {
                worker: hostname.clone(),
                index: gpu.index,
                name: gpu.name.clone(),
                memory: format!("{} MiB", gpu.total_memory_mib),
                uuid: gpu.uuid.clone(),
            });
        }
    }

    if rows.is_empty() {
        println!("No free GPUs right now.");
        return Ok(());
    }

    println!("{}", Table::new(rows).with(Style::sharp()));
    Ok(())
}
