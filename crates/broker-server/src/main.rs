use broker_server::{build_router, BrokerSettings, StartupError, Stores};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,broker_auth=debug,broker_server=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<(), StartupError> {
    let settings = BrokerSettings::from_env()?;
    let stores = Stores::from_settings(&settings).await?;
    let app = build_router(&settings, &stores)?;

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(bind_addr = %settings.bind_addr, "SSO broker listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "SSO broker stopped");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
