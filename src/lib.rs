//! Genomic track data access.
//!
//! - [`model`] - navigation contexts and the displayed region
//! - [`formats`] - BGZF, tabix, BED and BigWig/BigBed readers
//! - [`storage`] - byte-range fetchers
//! - [`sources`] - per-file track data sources
//! - [`manager`] - per-track state with stale-result protection
//! - [`handlers`] - HTTP surface

pub mod config;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod manager;
pub mod model;
pub mod sources;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
