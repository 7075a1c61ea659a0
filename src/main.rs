// Feed server - fan-out feed assembly and optimistic engagement over HTTP

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tao_feed::{
    app_state::AppState,
    config::Config,
    feed_interface::create_feed_router,
    infrastructure::notifications::{run_delivery_logger, ChannelNotificationDispatcher},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tao_feed=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let (notifier, deliveries) = ChannelNotificationDispatcher::new();
    tokio::spawn(run_delivery_logger(deliveries));

    let app_state = AppState::new(config.clone(), Arc::new(notifier)).await?;

    let app = Router::new()
        .nest("/api/v1", create_feed_router(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server_address();
    info!("Feed server listening on http://{}", addr);
    info!("  GET    /api/v1/feed?following=a,b      - Assemble feed");
    info!("  POST   /api/v1/posts                   - Publish post");
    info!("  DELETE /api/v1/posts/{{id}}              - Delete post and its comments");
    info!("  POST   /api/v1/posts/{{id}}/like         - Like (DELETE to unlike)");
    info!("  POST   /api/v1/posts/{{id}}/comments     - Comment (GET to list)");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
