//! Privacy floor for disclosed counts.
//!
//! Nothing leaves the engine as a raw size: a count below the minimum-hits threshold is
//! withheld, a single population size is reported exactly, and the parts of a breakdown are
//! rounded with an injected [`RoundingStrategy`].

use crate::constants::DEFAULT_ROUNDING_BUCKET;
use crate::error::{CohortError, CohortResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A count as it may be shown to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "count", rename_all = "snake_case")]
pub enum SizeOutcome {
    Exact(usize),
    Withheld,
    Rounded(usize),
}

impl fmt::Display for SizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeOutcome::Exact(n) => write!(f, "{n}"),
            SizeOutcome::Withheld => f.write_str("withheld"),
            SizeOutcome::Rounded(n) => write!(f, "~{n}"),
        }
    }
}

/// Maps a count onto its disclosed granularity. Must be a pure function of the count.
pub trait RoundingStrategy: Send + Sync + fmt::Debug {
    fn round(&self, count: usize) -> usize;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Nearest multiple; exact halves round up.
    #[default]
    Nearest,
    Down,
    Up,
}

impl FromStr for RoundingMode {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(RoundingMode::Nearest),
            "down" => Ok(RoundingMode::Down),
            "up" => Ok(RoundingMode::Up),
            other => Err(CohortError::InvalidInput(format!(
                "unknown rounding mode '{other}' (expected nearest, down or up)"
            ))),
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoundingMode::Nearest => "nearest",
            RoundingMode::Down => "down",
            RoundingMode::Up => "up",
        })
    }
}

/// Rounds to a multiple of a fixed bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRounding {
    bucket: usize,
    mode: RoundingMode,
}

impl BucketRounding {
    /// # Errors
    ///
    /// Returns `CohortError::InvalidInput` if `bucket` is zero.
    pub fn new(bucket: usize, mode: RoundingMode) -> CohortResult<Self> {
        if bucket == 0 {
            return Err(CohortError::InvalidInput(
                "rounding bucket must be at least 1".into(),
            ));
        }
        Ok(Self { bucket, mode })
    }

    pub fn bucket(&self) -> usize {
        self.bucket
    }

    pub fn mode(&self) -> RoundingMode {
        self.mode
    }
}

impl Default for BucketRounding {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_ROUNDING_BUCKET,
            mode: RoundingMode::Nearest,
        }
    }
}

impl RoundingStrategy for BucketRounding {
    fn round(&self, count: usize) -> usize {
        let bucket = self.bucket;
        let buckets = match self.mode {
            RoundingMode::Down => count / bucket,
            RoundingMode::Up => count.div_ceil(bucket),
            RoundingMode::Nearest => count.saturating_add(bucket / 2) / bucket,
        };
        buckets.saturating_mul(bucket)
    }
}

/// A withheld-or-disclosed breakdown of a population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub total: SizeOutcome,
    pub parts: BTreeMap<String, SizeOutcome>,
}

#[derive(Debug, Clone)]
pub struct PrivacyReporter {
    rounding: Arc<dyn RoundingStrategy>,
}

impl PrivacyReporter {
    pub fn new(rounding: Arc<dyn RoundingStrategy>) -> Self {
        Self { rounding }
    }

    /// Outcome for a single result set: withheld below `min_hits`, exact otherwise.
    pub fn report<T>(&self, result: &BTreeSet<T>, min_hits: usize) -> SizeOutcome {
        self.report_count(result.len(), min_hits)
    }

    pub fn report_count(&self, count: usize, min_hits: usize) -> SizeOutcome {
        if count < min_hits {
            SizeOutcome::Withheld
        } else {
            SizeOutcome::Exact(count)
        }
    }

    /// Rounded outcome for one part of a breakdown. Never exposes the raw count.
    pub fn report_rounded(&self, count: usize) -> SizeOutcome {
        SizeOutcome::Rounded(self.rounding.round(count))
    }

    /// Breakdown of a population of `total` records into named parts.
    ///
    /// The whole distribution is withheld when `total` is below `min_hits`, since small
    /// parts of a small population are as identifying as the population itself.
    pub fn report_distribution<I, K>(&self, total: usize, parts: I, min_hits: usize) -> Distribution
    where
        I: IntoIterator<Item = (K, usize)>,
        K: Into<String>,
    {
        if total < min_hits {
            return Distribution {
                total: SizeOutcome::Withheld,
                parts: parts
                    .into_iter()
                    .map(|(name, _)| (name.into(), SizeOutcome::Withheld))
                    .collect(),
            };
        }
        Distribution {
            total: SizeOutcome::Exact(total),
            parts: parts
                .into_iter()
                .map(|(name, count)| (name.into(), self.report_rounded(count)))
                .collect(),
        }
    }
}
