use eyre::WrapErr;
use showroom_sync::{SyncConfig, SyncPipeline, SyncReport, catalog::Facets};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(report) => {
            info!(
                target: "showroom.sync",
                run_id = %report.run_id,
                report = %serde_json::to_string(&report).unwrap_or_default(),
                "sync_report"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(target: "showroom.sync", "sync failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> eyre::Result<SyncReport> {
    let config = SyncConfig::from_env().wrap_err("loading configuration")?;
    let pipeline = SyncPipeline::from_config(&config);
    let (report, records) = pipeline.run().await?;

    let facets = Facets::from_records(&records);
    info!(
        target: "showroom.sync",
        records = records.len(),
        grades = facets.grades.len(),
        model_years = facets.model_years.len(),
        "catalog_ready"
    );
    Ok(report)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
