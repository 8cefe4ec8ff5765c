mod service_info;
mod tracks;
mod view;

pub use service_info::service_info;
pub use tracks::{create_track, delete_track, get_track, list_tracks, query_track, update_track};
pub use view::{get_view, post_view};

use crate::manager::TrackDataManager;
use crate::model::{Genome, NavigationContext};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TrackDataManager>,
    pub genome: Arc<Genome>,
    pub context: Arc<NavigationContext>,
    pub min_region_size: u64,
    pub width_px: f64,
    pub decode_workers: usize,
}

/// All routes, with request tracing. CORS is left to the caller.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .route("/view", get(get_view).post(post_view))
        .route("/tracks", get(list_tracks).post(create_track))
        .route(
            "/tracks/:id",
            get(get_track).put(update_track).delete(delete_track),
        )
        .route("/tracks/:id/query", get(query_track))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
