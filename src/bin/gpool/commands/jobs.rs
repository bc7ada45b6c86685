use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

use gpool::client::Client;
use gpool::config::Config;
use gpool::core::user::RequestUser;
use gpool::utils::format_remaining;

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "WORKER")]
    worker: String,
    #[tabled(rename = "GPUS")]
    gpus: usize,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "REMAINING")]
    remaining: String,
    #[tabled(rename = "PORTS")]
    ports: String,
}

pub(crate) async fn handle_jobs(config: &Config, user: &RequestUser) -> Result<()> {
    let client = Client::build(config)?;
    let views = client.jobs(user).await?;

    if views.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    let rows: Vec<JobRow> = views
        .iter()
        .map(|view| {
            let job = &view.job;
            let state = match (&view.placement, job.is_active()) {
                (Some(placement), _) => placement.state.clone(),
                (None, true) => "unknown".to_string(),
                (None, false) => "ended".to_string(),
            };
            let ports = view
                .placement
                .as_ref()
                .map(|p| {
                    p.ports
                        .iter()
                        .map(u16::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();

            JobRow {
                id: job.id,
                name: job.name.clone(),
                image: job.image.clone(),
                worker: job.worker_hostname.clone(),
                gpus: job.gpu_uuids.len(),
                state,
                remaining: if job.is_active() {
                    format_remaining(&job.expected_end_time)
                } else {
                    "-".to_string()
                },
                ports,
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::sharp()));
    Ok(())
}
