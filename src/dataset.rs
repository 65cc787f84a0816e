//! Loading the tabular World Cup sources.
//!
//! Two CSV files feed the pipeline: the tournament table (`world_cup.csv`)
//! and the match table (`matches_1930_2022.csv`). Headers are matched
//! case-insensitively, and fields that are not valid UTF-8 are decoded as
//! Latin-1, which is how the public dataset is encoded.
//!
//! Failures are absorbed at the smallest unit possible: a malformed row is
//! logged and skipped, a missing or unreadable file is logged and skipped,
//! and only the absence of every source is an error.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use worldcup_rag_core::models::{MatchRecord, Record};

use crate::config::DataConfig;

/// Everything loaded from the data directory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<Record>,
    pub matches: Vec<MatchRecord>,
    /// Files that loaded successfully.
    pub sources: Vec<PathBuf>,
    /// SHA-256 over the raw bytes of every loaded file, in load order.
    pub fingerprint: String,
}

/// Load every configured source, skipping the ones that fail.
pub fn load_dataset(config: &DataConfig) -> Result<Dataset> {
    let mut dataset = Dataset::default();
    let mut hasher = Sha256::new();

    let world_cup = config.world_cup_path();
    if let Some((records, bytes)) = load_source(&world_cup, read_world_cup) {
        info!(path = %world_cup.display(), rows = records.len(), "loaded tournaments");
        hasher.update(&bytes);
        dataset.records = records;
        dataset.sources.push(world_cup);
    }

    let matches = config.matches_path();
    if let Some((rows, bytes)) = load_source(&matches, read_matches) {
        info!(path = %matches.display(), rows = rows.len(), "loaded matches");
        hasher.update(&bytes);
        dataset.matches = rows;
        dataset.sources.push(matches);
    }

    if dataset.sources.is_empty() {
        bail!(
            "No data source could be loaded from {}",
            config.dir.display()
        );
    }

    dataset.fingerprint = format!("{:x}", hasher.finalize());
    Ok(dataset)
}

fn load_source<T>(path: &Path, read: fn(&[u8]) -> Result<Vec<T>>) -> Option<(Vec<T>, Vec<u8>)> {
    if !path.exists() {
        warn!(path = %path.display(), "data file not found, skipping");
        return None;
    }
    let bytes = match std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))
    {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "skipping data file");
            return None;
        }
    };
    match read(&bytes) {
        Ok(rows) => Some((rows, bytes)),
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{:#}", e), "skipping data file");
            None
        }
    }
}

/// Parse the tournament table.
///
/// Expected columns: `Year`, `Host`, `Teams`, `Champion`, `Runner-Up`,
/// `TopScorrer` (sic). Only `Year` is required as a column.
pub fn read_world_cup(bytes: &[u8]) -> Result<Vec<Record>> {
    let mut table = Table::new(bytes)?;
    let year = table.require("year")?;
    let host = table.column(&["host"]);
    let teams = table.column(&["teams"]);
    let champion = table.column(&["champion", "winner"]);
    let runner_up = table.column(&["runner-up", "runner_up", "runnerup"]);
    let scorer = table.column(&["topscorrer", "topscorer", "top_scorer"]);

    let mut records = Vec::new();
    table.for_each_row(|fields| {
        records.push(Record {
            year: field(fields, Some(year)).and_then(|s| parse_number(&s)),
            host: field(fields, host),
            champion: field(fields, champion),
            runner_up: field(fields, runner_up),
            top_scorer: field(fields, scorer),
            team_count: field(fields, teams).and_then(|s| parse_number(&s)),
        });
    });
    Ok(records)
}

/// Parse the match table.
///
/// Expected columns: `home_team`, `away_team`, `home_score`, `away_score`,
/// `Round`, `Venue`, `Year`.
pub fn read_matches(bytes: &[u8]) -> Result<Vec<MatchRecord>> {
    let mut table = Table::new(bytes)?;
    let home = table.require("home_team")?;
    let away = table.require("away_team")?;
    let home_score = table.column(&["home_score"]);
    let away_score = table.column(&["away_score"]);
    let round = table.column(&["round"]);
    let venue = table.column(&["venue"]);
    let year = table.column(&["year"]);

    let mut matches = Vec::new();
    table.for_each_row(|fields| {
        matches.push(MatchRecord {
            year: field(fields, year).and_then(|s| parse_number(&s)),
            round: field(fields, round),
            home_team: field(fields, Some(home)),
            away_team: field(fields, Some(away)),
            home_score: field(fields, home_score).and_then(|s| parse_number(&s)),
            away_score: field(fields, away_score).and_then(|s| parse_number(&s)),
            venue: field(fields, venue),
        });
    });
    Ok(matches)
}

/// A CSV reader with decoded, lowercased headers.
struct Table<'a> {
    reader: csv::Reader<&'a [u8]>,
    headers: Vec<String>,
}

impl<'a> Table<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);
        let headers = reader
            .byte_headers()
            .context("Failed to read CSV header")?
            .iter()
            .map(|h| decode(h).trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        Ok(Self { reader, headers })
    }

    fn column(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|n| self.headers.iter().position(|h| h == n))
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.column(&[name])
            .ok_or_else(|| anyhow::anyhow!("CSV is missing required column '{}'", name))
    }

    /// Call `f` with the decoded fields of every readable row; unreadable
    /// rows are logged and skipped.
    fn for_each_row(&mut self, mut f: impl FnMut(&[String])) {
        let mut record = csv::ByteRecord::new();
        let mut row = 0;
        loop {
            row += 1;
            match self.reader.read_byte_record(&mut record) {
                Ok(true) => {
                    let fields: Vec<String> = record.iter().map(decode).collect();
                    f(&fields);
                }
                Ok(false) => break,
                Err(e) => {
                    warn!(row, error = %e, "skipping unreadable CSV row");
                    if e.is_io_error() {
                        break;
                    }
                }
            }
        }
    }
}

/// UTF-8 if valid, otherwise Latin-1 (every byte maps to the code point of
/// the same value).
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Trimmed, non-empty field, treating `NaN`-style placeholders as missing.
fn field(fields: &[String], idx: Option<usize>) -> Option<String> {
    let value = fields.get(idx?)?.trim();
    match value {
        "" | "-" | "NaN" | "nan" | "NA" | "N/A" => None,
        v => Some(v.to_string()),
    }
}

/// Parse integers written either plainly or as floats (`"1930"`, `"1930.0"`).
fn parse_number<T: TryFrom<u64>>(s: &str) -> Option<T> {
    let n = match s.parse::<u64>() {
        Ok(n) => n,
        Err(_) => {
            let f = s.parse::<f64>().ok()?;
            if !f.is_finite() || f < 0.0 || f.fract() != 0.0 {
                return None;
            }
            f as u64
        }
    };
    T::try_from(n).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD_CUP: &str = "\
Year,Host,Teams,Champion,Runner-Up,TopScorrer,Attendance
2022,Qatar,32,Argentina,France,Kylian Mbappé - 8,3404252
2018,Russia,32,France,Croatia,Harry Kane - 6,3031768
,Nowhere,,,,,
1930,Uruguay,13.0,Uruguay,Argentina,Guillermo Stábile - 8,434000
";

    #[test]
    fn test_read_world_cup() {
        let records = read_world_cup(WORLD_CUP.as_bytes()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].year, Some(2022));
        assert_eq!(records[0].host.as_deref(), Some("Qatar"));
        assert_eq!(records[0].champion.as_deref(), Some("Argentina"));
        assert_eq!(records[0].runner_up.as_deref(), Some("France"));
        assert_eq!(records[0].top_scorer.as_deref(), Some("Kylian Mbappé - 8"));
        assert_eq!(records[0].team_count, Some(32));
        assert_eq!(records[2].year, None);
        assert_eq!(records[2].champion, None);
        assert_eq!(records[3].team_count, Some(13));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let csv = "YEAR,host,CHAMPION\n2014,Brazil,Germany\n";
        let records = read_world_cup(csv.as_bytes()).unwrap();
        assert_eq!(records[0].year, Some(2014));
        assert_eq!(records[0].host.as_deref(), Some("Brazil"));
        assert_eq!(records[0].champion.as_deref(), Some("Germany"));
        assert_eq!(records[0].runner_up, None);
    }

    #[test]
    fn test_missing_year_column_fails() {
        assert!(read_world_cup(b"Host,Champion\nQatar,Argentina\n").is_err());
    }

    #[test]
    fn test_latin1_fallback() {
        let mut bytes = b"Year,Host,Champion,TopScorrer\n1930,Uruguay,Uruguay,Guillermo St".to_vec();
        bytes.push(0xE1); // 'á' in Latin-1
        bytes.extend_from_slice(b"bile - 8\n");
        let records = read_world_cup(&bytes).unwrap();
        assert_eq!(records[0].top_scorer.as_deref(), Some("Guillermo Stábile - 8"));
    }

    #[test]
    fn test_read_matches() {
        let csv = "\
home_team,away_team,home_score,home_xg,away_score,Round,Venue,Year
Argentina,France,3,3.3,3,Final,Lusail Iconic Stadium,2022
Croatia,Morocco,2.0,,1,Third-place match,Khalifa International Stadium,2022
";
        let matches = read_matches(csv.as_bytes()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].home_team.as_deref(), Some("Argentina"));
        assert_eq!(matches[0].away_score, Some(3));
        assert_eq!(matches[0].round.as_deref(), Some("Final"));
        assert_eq!(matches[1].home_score, Some(2));
        assert_eq!(matches[1].year, Some(2022));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u16>("2022"), Some(2022));
        assert_eq!(parse_number::<u16>("2022.0"), Some(2022));
        assert_eq!(parse_number::<u16>("20.5"), None);
        assert_eq!(parse_number::<u16>("-3"), None);
        assert_eq!(parse_number::<u16>("99999"), None);
    }

    #[test]
    fn test_load_dataset_skips_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("world_cup.csv"), WORLD_CUP).unwrap();
        let config = DataConfig {
            dir: dir.path().to_path_buf(),
            ..DataConfig::default()
        };
        let dataset = load_dataset(&config).unwrap();
        assert_eq!(dataset.sources.len(), 1);
        assert_eq!(dataset.records.len(), 4);
        assert!(dataset.matches.is_empty());
        assert_eq!(dataset.fingerprint.len(), 64);
    }

    #[test]
    fn test_load_dataset_no_sources_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DataConfig {
            dir: dir.path().to_path_buf(),
            ..DataConfig::default()
        };
        assert!(load_dataset(&config).is_err());
    }
}
