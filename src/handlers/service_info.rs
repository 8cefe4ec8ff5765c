use super::AppState;
use crate::types::{GenomeInfo, ServiceInfo};
use axum::Json;
use axum::extract::State;

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.example.trackr".to_string(),
        name: "trackr".to_string(),
        description: "Genomic track queries over indexed BGZF, BigWig and BigBed files".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        genome: GenomeInfo {
            name: state.genome.name().to_string(),
            total_length: state.context.total_length(),
            chromosomes: state.context.segments().len(),
        },
        tracks: state.manager.track_ids().len(),
        decode_workers: state.decode_workers,
    })
}
