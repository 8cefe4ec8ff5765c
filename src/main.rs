use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackr::{
    Config,
    handlers::{AppState, create_router},
    manager::TrackDataManager,
    model::{DisplayedRegionModel, Genome, RegionExpander},
    sources::{DecodePool, SourceFactory},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sizes = tokio::fs::read_to_string(&config.genome)
        .await
        .with_context(|| format!("reading genome {:?}", config.genome))?;
    let genome = Arc::new(Genome::from_chrom_sizes(config.genome_name.clone(), &sizes)?);
    let context = Arc::new(genome.make_context()?);

    let data_dir = tokio::fs::canonicalize(&config.data_dir)
        .await
        .with_context(|| format!("data directory {:?}", config.data_dir))?;

    let workers = config.decode_workers();
    let factory = SourceFactory::new(
        data_dir.clone(),
        DecodePool::new(workers),
        config.index_cache_capacity,
        config.data_limit,
    )
    .with_http(config.http_timeout())?;
    let manager = Arc::new(TrackDataManager::new(
        factory,
        RegionExpander::new(config.expansion),
    ));
    manager.set_view(
        DisplayedRegionModel::new(context.clone(), config.min_region_size),
        config.width_px,
    )?;

    let state = AppState {
        manager,
        genome,
        context,
        min_region_size: config.min_region_size,
        width_px: config.width_px,
        decode_workers: workers,
    };

    let app = create_router(state);
    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = config.bind_address();
    tracing::info!("Starting trackr server on {}", addr);
    tracing::info!("Genome: {:?} ({} decode workers)", config.genome, workers);
    tracing::info!("Data directory: {:?}", data_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
