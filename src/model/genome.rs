//! Builders for navigation contexts: whole genomes and region sets.

use super::context::NavigationContext;
use super::interval::ChromosomeInterval;
use super::segment::{Segment, Strand};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Named chromosome lengths.
#[derive(Debug, Clone)]
pub struct Genome {
    name: String,
    chromosomes: Vec<(String, u64)>,
    lengths: HashMap<String, u64>,
}

impl Genome {
    pub fn new(name: impl Into<String>, chromosomes: Vec<(String, u64)>) -> Self {
        let name = name.into();
        let mut lengths = HashMap::with_capacity(chromosomes.len());
        for (chr, len) in &chromosomes {
            if lengths.insert(chr.clone(), *len).is_some() {
                warn!(genome = %name, chromosome = %chr, "duplicate chromosome name");
            }
        }
        Self {
            name,
            chromosomes,
            lengths,
        }
    }

    /// Parses a UCSC `chrom.sizes` file: one `name<TAB>length` pair per line.
    pub fn from_chrom_sizes(name: impl Into<String>, text: &str) -> Result<Self> {
        let mut chromosomes = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(chr), Some(len)) = (fields.next(), fields.next()) else {
                return Err(Error::InvalidInput(format!(
                    "chrom.sizes line {}: expected name and length",
                    line_no + 1
                )));
            };
            let len: u64 = len.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "chrom.sizes line {}: bad length '{}'",
                    line_no + 1,
                    len
                ))
            })?;
            chromosomes.push((chr.to_string(), len));
        }
        Ok(Self::new(name, chromosomes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chromosome_length(&self, chr: &str) -> Option<u64> {
        self.lengths.get(chr).copied()
    }

    /// Clips an interval to its chromosome. `None` when the chromosome is
    /// unknown or the interval lies past its end.
    pub fn intersect_interval(&self, interval: &ChromosomeInterval) -> Option<ChromosomeInterval> {
        let len = self.chromosome_length(&interval.chr)?;
        ChromosomeInterval::new(interval.chr.clone(), 0, len).overlap(interval)
    }

    pub fn make_context(&self) -> Result<NavigationContext> {
        let segments = self
            .chromosomes
            .iter()
            .map(|(chr, len)| Segment::chromosome(chr.clone(), *len))
            .collect();
        NavigationContext::genome(self.name.clone(), segments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlankType {
    #[default]
    SurroundAll,
    SurroundStart,
    SurroundEnd,
}

/// How much sequence to show around each region-set feature. Upstream and
/// downstream follow the feature's strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlankingStrategy {
    #[serde(default)]
    pub kind: FlankType,
    #[serde(default)]
    pub upstream: u64,
    #[serde(default)]
    pub downstream: u64,
}

impl FlankingStrategy {
    pub fn new(kind: FlankType, upstream: u64, downstream: u64) -> Self {
        Self {
            kind,
            upstream,
            downstream,
        }
    }

    /// The flanked copy of `feature`, clipped to the genome. `None` when
    /// nothing of it is left inside the genome.
    pub fn flank(&self, feature: &Segment, genome: &Genome) -> Option<Segment> {
        let locus = feature.locus()?;
        let interval = &locus.interval;
        let reverse = locus.strand == Strand::Reverse;

        let (tx_start, tx_end) = if reverse {
            (interval.end as i64, interval.start as i64)
        } else {
            (interval.start as i64, interval.end as i64)
        };
        let (a, b) = match self.kind {
            FlankType::SurroundAll => (tx_start, tx_end),
            FlankType::SurroundStart => (tx_start, tx_start),
            FlankType::SurroundEnd => (tx_end, tx_end),
        };
        let (up, down) = (self.upstream as i64, self.downstream as i64);
        let (a, b) = if reverse { (a + up, b - down) } else { (a - up, b + down) };
        let (start, end) = (a.min(b).max(0) as u64, a.max(b).max(0) as u64);

        let flanked = genome.intersect_interval(&ChromosomeInterval::new(
            interval.chr.clone(),
            start,
            end,
        ))?;
        Some(Segment::new(
            Some(feature.name().to_string()),
            flanked,
            locus.strand,
        ))
    }
}

/// A named list of features viewed side by side, each widened by a flanking
/// strategy.
#[derive(Debug, Clone)]
pub struct RegionSet {
    name: String,
    features: Vec<Segment>,
    genome: Arc<Genome>,
    flanking: FlankingStrategy,
}

impl RegionSet {
    pub const MIN_REGION_LENGTH: u64 = 100;

    pub fn new(name: impl Into<String>, genome: Arc<Genome>, flanking: FlankingStrategy) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            genome,
            flanking,
        }
    }

    pub fn features(&self) -> &[Segment] {
        &self.features
    }

    pub fn add_feature(&mut self, feature: Segment) -> Result<()> {
        let Some(locus) = feature.locus() else {
            return Err(Error::InvalidRange("Feature must have a locus".to_string()));
        };
        if feature.name().is_empty() {
            return Err(Error::InvalidRange("Feature must have a name".to_string()));
        }
        if self.features.iter().any(|f| f.name() == feature.name()) {
            return Err(Error::InvalidRange(
                "No duplicate feature names allowed".to_string(),
            ));
        }
        let inside = self.genome.intersect_interval(&locus.interval);
        if inside.is_none_or(|i| i.len() < Self::MIN_REGION_LENGTH) {
            return Err(Error::InvalidRange(
                "Feature not in genome or is too short".to_string(),
            ));
        }
        self.features.push(feature);
        Ok(())
    }

    pub fn remove_feature(&mut self, index: usize) -> Option<Segment> {
        (index < self.features.len()).then(|| self.features.remove(index))
    }

    pub fn set_flanking(&mut self, flanking: FlankingStrategy) {
        self.flanking = flanking;
    }

    pub fn make_context(&self) -> Result<NavigationContext> {
        let segments = self
            .features
            .iter()
            .filter_map(|f| self.flanking.flank(f, &self.genome))
            .collect();
        NavigationContext::new(self.name.clone(), segments)
    }
}
