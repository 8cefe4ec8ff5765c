use super::AppState;
use crate::manager::{TrackId, UpdateEffect};
use crate::model::DisplayedRegionModel;
use crate::sources::TrackSpec;
use crate::types::{QueryResponse, TrackList, TrackQuery, TrackResponse, TrackSummary};
use crate::{Error, Result};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::info;

fn track_response(state: &AppState, id: TrackId) -> Result<TrackResponse> {
    let spec = state
        .manager
        .track_spec(id)
        .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
    let data = state
        .manager
        .track_data(id)
        .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
    Ok(TrackResponse::new(id, spec, data))
}

/// Fetches for the current view, if there is one. Track failures land in
/// the track's state rather than the response status.
async fn fetch_if_viewing(state: &AppState, id: TrackId) -> Result<()> {
    if state.manager.view().is_some() {
        state.manager.fetch_track(id).await?;
    }
    Ok(())
}

pub async fn list_tracks(State(state): State<AppState>) -> Json<TrackList> {
    let tracks = state
        .manager
        .track_ids()
        .into_iter()
        .filter_map(|id| {
            let spec = state.manager.track_spec(id)?;
            let data = state.manager.track_data(id)?;
            Some(TrackSummary {
                id,
                spec,
                status: data.status,
            })
        })
        .collect();
    Json(TrackList { tracks })
}

pub async fn create_track(
    State(state): State<AppState>,
    Json(spec): Json<TrackSpec>,
) -> Result<(StatusCode, Json<TrackResponse>)> {
    let url = spec.url.clone();
    let id = state.manager.add_track(spec)?;
    info!(%id, %url, "track added");
    fetch_if_viewing(&state, id).await?;
    Ok((StatusCode::CREATED, Json(track_response(&state, id)?)))
}

pub async fn get_track(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TrackResponse>> {
    Ok(Json(track_response(&state, TrackId::new(id))?))
}

pub async fn update_track(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(spec): Json<TrackSpec>,
) -> Result<Json<TrackResponse>> {
    let id = TrackId::new(id);
    let effect = state.manager.update_track(id, spec)?;
    if effect != UpdateEffect::None {
        fetch_if_viewing(&state, id).await?;
    }
    let mut response = track_response(&state, id)?;
    response.update = Some(effect);
    Ok(Json(response))
}

pub async fn delete_track(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    let id = TrackId::new(id);
    state.manager.remove_track(id)?;
    info!(%id, "track removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Reads a track over any region without touching the view.
pub async fn query_track(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<TrackQuery>,
) -> Result<Json<QueryResponse>> {
    let interval = state.context.parse(&query.region)?;
    let mut region = DisplayedRegionModel::new(state.context.clone(), 1);
    let start = i64::try_from(interval.start)
        .map_err(|_| Error::OutOfRange(format!("coordinate {} too large", interval.start)))?;
    let end = i64::try_from(interval.end)
        .map_err(|_| Error::OutOfRange(format!("coordinate {} too large", interval.end)))?;
    region.set_region(start, end);

    let records = state
        .manager
        .query_track(TrackId::new(id), &region, query.bpp.unwrap_or(0.0), None)
        .await?;
    Ok(Json(QueryResponse {
        region: state.context.format_interval(&interval),
        count: records.len(),
        records,
    }))
}
