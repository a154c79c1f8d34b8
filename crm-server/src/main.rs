use anyhow::Result;
use crm_core::CrmConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = CrmConfig::new();
    config.load_env("CRM__");

    let ax = crm_server::build(&config)?;
    let addr = crm_server::listen_addr(&config);

    tracing::info!(%addr, "crm-server starting");
    ax.listen(addr).await?;

    Ok(())
}
