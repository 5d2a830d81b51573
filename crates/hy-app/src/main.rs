use hy_app::backend::{self, config::BackendConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = BackendConfig::load()?;
    backend::serve(config).await
}
