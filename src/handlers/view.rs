use super::AppState;
use crate::manager::ViewState;
use crate::model::{DisplayedRegionModel, OpenInterval};
use crate::types::{TrackOutcome, ViewRequest, ViewResponse};
use crate::{Error, Result};
use axum::Json;
use axum::extract::State;

pub async fn get_view(State(state): State<AppState>) -> Result<Json<ViewResponse>> {
    let view = state
        .manager
        .view()
        .ok_or_else(|| Error::NotFound("no view has been set".to_string()))?;
    Ok(Json(view_response(&state, &view, Vec::new())))
}

/// Applies a view change and refetches every track when the view moved.
pub async fn post_view(
    State(state): State<AppState>,
    Json(request): Json<ViewRequest>,
) -> Result<Json<ViewResponse>> {
    let current = state.manager.view();
    let mut region = match &current {
        Some(view) => view.region.clone(),
        None => DisplayedRegionModel::new(state.context.clone(), state.min_region_size),
    };

    if let Some(text) = &request.region {
        let interval = state.context.parse(text)?;
        let (start, end) = widen_to_minimum(&interval, region.effective_min_width());
        region.set_region(to_i64(start)?, to_i64(end)?);
    }
    if let Some(factor) = request.zoom {
        region.zoom(factor, request.focus.unwrap_or(0.5))?;
    }
    if let Some(delta) = request.pan {
        region.pan(delta);
    }

    let width_px = request
        .width_px
        .or(current.as_ref().map(|v| v.width_px))
        .unwrap_or(state.width_px);
    let changed = state.manager.set_view(region, width_px)?;

    let tracks = if changed {
        state
            .manager
            .refresh_all()
            .await
            .into_iter()
            .map(|(id, result)| match result {
                Ok(outcome) => TrackOutcome {
                    id,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(err) => TrackOutcome {
                    id,
                    outcome: None,
                    error: Some(err.to_string()),
                },
            })
            .collect()
    } else {
        Vec::new()
    };

    let view = state
        .manager
        .view()
        .ok_or_else(|| Error::Internal("view missing after update".to_string()))?;
    Ok(Json(view_response(&state, &view, tracks)))
}

/// Centers intervals narrower than `min_width` on their midpoint.
fn widen_to_minimum(interval: &OpenInterval, min_width: u64) -> (u64, u64) {
    if interval.len() >= min_width {
        return (interval.start, interval.end);
    }
    let mid = interval.start + interval.len() / 2;
    let start = mid.saturating_sub(min_width / 2);
    (start, start + min_width)
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::OutOfRange(format!("coordinate {} too large", value)))
}

fn view_response(state: &AppState, view: &ViewState, tracks: Vec<TrackOutcome>) -> ViewResponse {
    let expanded = &view.expansion.expanded_region;
    ViewResponse {
        generation: view.generation,
        region: state.context.format_interval(&view.region.absolute_region()),
        start: view.region.start(),
        end: view.region.end(),
        width_px: view.width_px,
        bases_per_pixel: view.bases_per_pixel,
        expanded_region: state.context.format_interval(&expanded.absolute_region()),
        view_window: view.expansion.view_window,
        tracks,
    }
}
