use crate::formats::Record;
use crate::manager::{FetchOutcome, TrackData, TrackId, TrackStatus, UpdateEffect};
use crate::model::ViewWindow;
use crate::sources::TrackSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Service info response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub genome: GenomeInfo,
    pub tracks: usize,
    pub decode_workers: usize,
}

#[derive(Debug, Serialize)]
pub struct GenomeInfo {
    pub name: String,
    pub total_length: u64,
    pub chromosomes: usize,
}

/// Change to the displayed region. Fields apply in order: `region`, then
/// `zoom` about `focus`, then `pan`.
#[derive(Debug, Default, Deserialize)]
pub struct ViewRequest {
    /// Coordinate text such as `chr1:1,000-2,000`.
    pub region: Option<String>,
    /// Width multiplier; values above 1 zoom out.
    pub zoom: Option<f64>,
    /// Zoom pivot as a fraction of the width, 0.5 when absent.
    pub focus: Option<f64>,
    /// Bases to move right (negative moves left).
    pub pan: Option<i64>,
    pub width_px: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub generation: u64,
    /// The view as coordinate text.
    pub region: String,
    pub start: u64,
    pub end: u64,
    pub width_px: f64,
    pub bases_per_pixel: f64,
    pub expanded_region: String,
    pub view_window: ViewWindow,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<TrackOutcome>,
}

#[derive(Debug, Serialize)]
pub struct TrackOutcome {
    pub id: TrackId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FetchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub id: TrackId,
    pub spec: TrackSpec,
    pub status: TrackStatus,
    pub view_generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub records: Arc<Vec<Record>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateEffect>,
}

impl TrackResponse {
    pub fn new(id: TrackId, spec: TrackSpec, data: TrackData) -> Self {
        Self {
            id,
            spec,
            status: data.status,
            view_generation: data.view_generation,
            error: data.error,
            records: data.records,
            update: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrackList {
    pub tracks: Vec<TrackSummary>,
}

#[derive(Debug, Serialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub spec: TrackSpec,
    pub status: TrackStatus,
}

/// Query parameters for a one-off track read.
#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    pub region: String,
    /// Bases per pixel, used to pick BigWig zoom levels. Base pairs when
    /// absent.
    pub bpp: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub region: String,
    pub count: usize,
    pub records: Vec<Record>,
}
