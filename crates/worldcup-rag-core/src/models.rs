//! Core data models used throughout the pipeline.
//!
//! [`Record`] and [`MatchRecord`] come from the tabular sources,
//! [`Statement`]s are materialized from them, and [`Chunk`]s are the
//! retrieval units built from statements.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One tournament edition as loaded from the `world_cup` table.
///
/// Every field is optional because source rows can be incomplete; the
/// materializer skips whatever is missing. A record without a `year` is
/// malformed and produces no statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub year: Option<u16>,
    pub host: Option<String>,
    pub champion: Option<String>,
    pub runner_up: Option<String>,
    pub top_scorer: Option<String>,
    pub team_count: Option<u32>,
}

/// One match row from the `matches` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub year: Option<u16>,
    pub round: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub venue: Option<String>,
}

/// Fact category a [`Statement`] is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Champion,
    RunnerUp,
    Host,
    TopScorer,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Champion => "champion",
            Category::RunnerUp => "runner_up",
            Category::Host => "host",
            Category::TopScorer => "top_scorer",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single self-contained natural-language fact.
///
/// `year` is a back-reference to the originating [`Record`]; aggregate
/// statements spanning several tournaments carry `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: String,
    pub text: String,
    pub category: Category,
    pub year: Option<u16>,
    /// True when the text explicitly contrasts host against champion.
    pub disambiguation: bool,
}

/// Target length class a [`Chunk`] was produced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Small,
    Medium,
    Large,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Small => "small",
            Granularity::Medium => "medium",
            Granularity::Large => "large",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Granularity::Small),
            "medium" => Ok(Granularity::Medium),
            "large" => Ok(Granularity::Large),
            other => anyhow::bail!(
                "Unknown granularity: '{}'. Must be small, medium, or large.",
                other
            ),
        }
    }
}

/// A contiguous slice of statement text indexed for retrieval.
///
/// `offset` and `overlap` are measured in characters: `offset` is where the
/// chunk starts in its source text, `overlap` is how many leading
/// characters it shares with the previous chunk of the same level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// SHA-256 over granularity and text; stable across rebuilds.
    pub id: String,
    pub text: String,
    pub source_statement_ids: Vec<String>,
    pub granularity: Granularity,
    pub byte_length: usize,
    pub offset: usize,
    pub overlap: usize,
}
