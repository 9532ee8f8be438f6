use std::sync::Arc;

use tracing::info;

use bierp_api::app::{build_app_with, services::AppServices};
use bierp_api::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bierp_observability::init();

    let settings = Settings::load()?;
    let services = Arc::new(AppServices::from_settings(&settings).await?);
    services.spawn_notification_log()?;

    let app = build_app_with(settings.jwt_secret(), services);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "bierp-api listening");

    axum::serve(listener, app).await?;
    Ok(())
}
