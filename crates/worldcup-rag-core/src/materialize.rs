//! Fact materializer: turns tabular records into many independently
//! phrased natural-language [`Statement`]s.
//!
//! Phrasings live in declarative template tables ([`RECORD_TEMPLATES`],
//! [`MATCH_TEMPLATES`]). Adding a phrasing means adding a row, never
//! touching control flow. Templates use `{field}` placeholders; a template
//! whose placeholder resolves to a missing or blank field is skipped, so no
//! statement is ever rendered with an empty substitution.
//!
//! Every record with distinct host and champion gets at least one statement
//! carrying [`CONTRAST_MARKER`], which keeps "where it happened" and "who
//! won" apart when a retriever sees the statement in isolation.

use std::collections::{BTreeMap, HashSet};

use crate::models::{Category, MatchRecord, Record, Statement};

/// Marker present in every statement that contrasts host and champion.
pub const CONTRAST_MARKER: char = '≠';

/// When a template applies, relative to the record's host and champion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Always,
    /// Host and champion are both known and differ.
    HostDiffers,
    /// Host and champion are both known and identical.
    HostIsChampion,
}

/// One row of a phrasing table.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub category: Category,
    pub when: When,
    pub disambiguation: bool,
    pub text: &'static str,
}

const fn t(category: Category, text: &'static str) -> Template {
    Template {
        category,
        when: When::Always,
        disambiguation: false,
        text,
    }
}

const fn contrast(category: Category, when: When, text: &'static str) -> Template {
    Template {
        category,
        when,
        disambiguation: true,
        text,
    }
}

/// Phrasings emitted for each tournament [`Record`].
pub const RECORD_TEMPLATES: &[Template] = &[
    // champion
    t(Category::Champion, "O campeão da Copa do Mundo de {year} foi {champion}."),
    t(Category::Champion, "{champion} venceu a Copa do Mundo FIFA de {year} e ficou com o título."),
    t(Category::Champion, "Quem ganhou a Copa do Mundo de {year}? {champion}."),
    t(Category::Champion, "Quem foi campeão em {year}? {champion}."),
    t(Category::Champion, "Copa {year} | Campeão: {champion}"),
    t(Category::Champion, "Na final da Copa de {year}, {champion} derrotou {runner_up} e foi campeão."),
    t(Category::Champion, "{champion} won the {year} FIFA World Cup."),
    t(Category::Champion, "Who won the {year} World Cup? {champion}."),
    // runner-up
    t(Category::RunnerUp, "O vice-campeão da Copa do Mundo de {year} foi {runner_up}."),
    t(Category::RunnerUp, "{runner_up} perdeu a final da Copa de {year} para {champion} e terminou como vice-campeão."),
    t(Category::RunnerUp, "Quem foi vice-campeão em {year}? {runner_up}."),
    t(Category::RunnerUp, "Copa {year} | Vice: {runner_up}"),
    t(Category::RunnerUp, "{runner_up} was the runner-up of the {year} FIFA World Cup."),
    // host
    t(Category::Host, "A Copa do Mundo de {year} foi realizada em {host}."),
    t(Category::Host, "{host} foi o país-sede da Copa do Mundo FIFA de {year}."),
    t(Category::Host, "Onde foi a Copa de {year}? Em {host}, o país-sede."),
    t(Category::Host, "Quem sediou a Copa do Mundo de {year}? {host}."),
    t(Category::Host, "Copa {year} | Sede: {host}"),
    t(Category::Host, "The {year} FIFA World Cup was hosted by {host}."),
    // top scorer
    t(Category::TopScorer, "O artilheiro da Copa do Mundo de {year} foi {top_scorer}."),
    t(Category::TopScorer, "{top_scorer} foi o artilheiro da Copa de {year} com {goals} gols."),
    t(Category::TopScorer, "Quem foi o artilheiro da Copa de {year}? {top_scorer}."),
    t(Category::TopScorer, "Copa {year} | Artilheiro: {top_scorer}"),
    t(Category::TopScorer, "The top scorer of the {year} World Cup was {top_scorer}."),
    // other
    t(Category::Other, "A Copa do Mundo de {year} teve {team_count} seleções participantes."),
    t(Category::Other, "Copa {year} | Seleções: {team_count}"),
    // host vs champion
    contrast(
        Category::Champion,
        When::HostDiffers,
        "Em {year}, {host} foi apenas o país-sede; o campeão foi {champion} (sede ≠ campeão).",
    ),
    contrast(
        Category::Host,
        When::HostDiffers,
        "Atenção: a Copa de {year} aconteceu em {host}, mas quem venceu foi {champion}. Sede ≠ campeão.",
    ),
    contrast(
        Category::Champion,
        When::HostDiffers,
        "In {year} the host was {host} but the champion was {champion} (host ≠ champion).",
    ),
    contrast(
        Category::Champion,
        When::HostIsChampion,
        "Em {year}, {champion} foi ao mesmo tempo país-sede e campeão da Copa do Mundo.",
    ),
    contrast(
        Category::Host,
        When::HostIsChampion,
        "In {year}, {host} hosted the World Cup and also won it (host = champion).",
    ),
];

/// Phrasings emitted for each [`MatchRecord`].
pub const MATCH_TEMPLATES: &[Template] = &[
    t(Category::Other, "Copa {year}, {round}: {home_team} {home_score} x {away_score} {away_team}."),
    t(Category::Other, "Na Copa de {year} ({round}), {home_team} enfrentou {away_team} em {venue}."),
    t(Category::Other, "{year} World Cup, {round}: {home_team} {home_score}-{away_score} {away_team}."),
];

/// Materialize statements for every tournament record.
///
/// Records without a year are skipped and logged. A repeated year keeps the
/// first record. Output order follows input order, and within a record the
/// template table order.
pub fn materialize(records: &[Record]) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut seen_years = HashSet::new();

    for (row, record) in records.iter().enumerate() {
        let Some(year) = record.year else {
            tracing::warn!(row, "skipping tournament record without year");
            continue;
        };
        if !seen_years.insert(year) {
            tracing::warn!(row, year, "skipping duplicate tournament record");
            continue;
        }

        let relation = host_relation(record);
        let mut index = 0;
        for template in RECORD_TEMPLATES {
            let applies = match template.when {
                When::Always => true,
                other => relation == Some(other),
            };
            if !applies {
                continue;
            }
            let Some(text) = render(template.text, |name| record_field(record, name)) else {
                continue;
            };
            statements.push(Statement {
                id: format!("{}-{}-{:02}", year, template.category, index),
                text,
                category: template.category,
                year: Some(year),
                disambiguation: template.disambiguation,
            });
            index += 1;
        }
    }

    statements
}

/// Materialize statements for match rows. Rows without a year or without
/// both teams are skipped.
pub fn materialize_matches(matches: &[MatchRecord]) -> Vec<Statement> {
    let mut statements = Vec::new();

    for (row, m) in matches.iter().enumerate() {
        let (Some(year), Some(_), Some(_)) = (
            m.year,
            non_empty(&m.home_team),
            non_empty(&m.away_team),
        ) else {
            tracing::warn!(row, "skipping match record without year or teams");
            continue;
        };

        let mut index = 0;
        for template in MATCH_TEMPLATES {
            let Some(text) = render(template.text, |name| match_field(m, name)) else {
                continue;
            };
            statements.push(Statement {
                id: format!("{}-match-{}-{:02}", year, row, index),
                text,
                category: template.category,
                year: Some(year),
                disambiguation: false,
            });
            index += 1;
        }
    }

    statements
}

/// Cross-tournament aggregates: title counts per country, hosting history
/// per country, and the full champion and host lists.
pub fn materialize_summaries(records: &[Record]) -> Vec<Statement> {
    let mut titles: BTreeMap<String, Vec<u16>> = BTreeMap::new();
    let mut hosted: BTreeMap<String, Vec<u16>> = BTreeMap::new();
    let mut seen_years = HashSet::new();

    for record in records {
        let Some(year) = record.year else { continue };
        if !seen_years.insert(year) {
            continue;
        }
        if let Some(champion) = non_empty(&record.champion) {
            titles.entry(champion.to_string()).or_default().push(year);
        }
        if let Some(host) = non_empty(&record.host) {
            hosted.entry(host.to_string()).or_default().push(year);
        }
    }

    let mut statements = Vec::new();
    let mut push = |category: Category, key: &str, text: String| {
        let id = format!("summary-{}-{}-{:02}", category, slug(key), statements.len());
        statements.push(Statement {
            id,
            text,
            category,
            year: None,
            disambiguation: false,
        });
    };

    for (country, years) in &mut titles {
        years.sort_unstable();
        let n = years.len();
        let list = join_years(years);
        let cups = if n == 1 { "Copa do Mundo" } else { "Copas do Mundo" };
        push(
            Category::Champion,
            country.as_str(),
            format!("{} conquistou {} {}: {}.", country, n, cups, list),
        );
        push(
            Category::Champion,
            country.as_str(),
            format!("Quantas Copas {} tem? {} títulos ({}).", country, n, list),
        );
        let times = if n == 1 { "time" } else { "times" };
        push(
            Category::Champion,
            country.as_str(),
            format!("{} has won the World Cup {} {}: {}.", country, n, times, list),
        );
    }

    for (country, years) in &mut hosted {
        years.sort_unstable();
        push(
            Category::Host,
            country.as_str(),
            format!("{} sediou a Copa do Mundo em {}.", country, join_years(years)),
        );
    }

    let mut by_year: Vec<(u16, &Record)> = records
        .iter()
        .filter_map(|r| r.year.map(|y| (y, r)))
        .collect();
    by_year.sort_by_key(|(y, _)| *y);
    by_year.dedup_by_key(|(y, _)| *y);

    let champions: Vec<String> = by_year
        .iter()
        .filter_map(|(y, r)| non_empty(&r.champion).map(|c| format!("{} {}", y, c)))
        .collect();
    if !champions.is_empty() {
        push(
            Category::Champion,
            "list",
            format!("Lista de campeões da Copa do Mundo: {}.", champions.join("; ")),
        );
    }

    let hosts: Vec<String> = by_year
        .iter()
        .filter_map(|(y, r)| non_empty(&r.host).map(|h| format!("{} {}", y, h)))
        .collect();
    if !hosts.is_empty() {
        push(
            Category::Host,
            "list",
            format!("Lista de países-sede da Copa do Mundo: {}.", hosts.join("; ")),
        );
    }

    statements
}

/// Substitute `{field}` placeholders. Returns `None` if any placeholder
/// resolves to nothing, or if a brace is left unclosed.
pub fn render<F>(template: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let value = lookup(&after[..close])?;
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Some(out)
}

/// Split a dataset scorer cell like `"Gerd Müller - 10"` into name and goals.
pub fn split_scorer(raw: &str) -> (&str, Option<u32>) {
    match raw.rsplit_once(" - ") {
        Some((name, goals)) => match goals.trim().parse::<u32>() {
            Ok(n) if !name.trim().is_empty() => (name.trim(), Some(n)),
            _ => (raw.trim(), None),
        },
        None => (raw.trim(), None),
    }
}

fn record_field(record: &Record, name: &str) -> Option<String> {
    match name {
        "year" => record.year.map(|y| y.to_string()),
        "host" => non_empty(&record.host).map(str::to_string),
        "champion" => non_empty(&record.champion).map(str::to_string),
        "runner_up" => non_empty(&record.runner_up).map(str::to_string),
        "top_scorer" => non_empty(&record.top_scorer).map(|s| split_scorer(s).0.to_string()),
        "goals" => non_empty(&record.top_scorer)
            .and_then(|s| split_scorer(s).1)
            .map(|g| g.to_string()),
        "team_count" => record.team_count.map(|n| n.to_string()),
        _ => None,
    }
}

fn match_field(m: &MatchRecord, name: &str) -> Option<String> {
    match name {
        "year" => m.year.map(|y| y.to_string()),
        "round" => non_empty(&m.round).map(str::to_string),
        "home_team" => non_empty(&m.home_team).map(str::to_string),
        "away_team" => non_empty(&m.away_team).map(str::to_string),
        "home_score" => m.home_score.map(|s| s.to_string()),
        "away_score" => m.away_score.map(|s| s.to_string()),
        "venue" => non_empty(&m.venue).map(str::to_string),
        _ => None,
    }
}

fn host_relation(record: &Record) -> Option<When> {
    let host = non_empty(&record.host)?;
    let champion = non_empty(&record.champion)?;
    if host.eq_ignore_ascii_case(champion) {
        Some(When::HostIsChampion)
    } else {
        Some(When::HostDiffers)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn join_years(years: &[u16]) -> String {
    years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(year: u16, host: &str, champion: &str, runner_up: &str, scorer: &str) -> Record {
        Record {
            year: Some(year),
            host: Some(host.to_string()),
            champion: Some(champion.to_string()),
            runner_up: Some(runner_up.to_string()),
            top_scorer: Some(scorer.to_string()),
            team_count: Some(32),
        }
    }

    fn qatar() -> Record {
        record(2022, "Qatar", "Argentina", "France", "Kylian Mbappé - 8")
    }

    #[test]
    fn test_contrast_statement_for_distinct_host() {
        let records = vec![
            qatar(),
            record(2014, "Brazil", "Germany", "Argentina", "James Rodríguez - 6"),
            record(1950, "Brazil", "Uruguay", "Brazil", "Ademir - 8"),
        ];
        let statements = materialize(&records);

        for r in &records {
            let host = r.host.as_deref().unwrap();
            let champion = r.champion.as_deref().unwrap();
            let found = statements.iter().any(|s| {
                s.year == r.year
                    && s.disambiguation
                    && s.text.contains(host)
                    && s.text.contains(champion)
                    && s.text.contains(CONTRAST_MARKER)
            });
            assert!(found, "no contrast statement for {:?}", r.year);
        }
    }

    #[test]
    fn test_host_is_champion_gets_same_country_statement() {
        let statements = materialize(&[record(1930, "Uruguay", "Uruguay", "Argentina", "Guillermo Stábile - 8")]);
        assert!(statements
            .iter()
            .any(|s| s.disambiguation && s.text.contains("ao mesmo tempo país-sede e campeão")));
        assert!(!statements.iter().any(|s| s.text.contains(CONTRAST_MARKER)));
    }

    #[test]
    fn test_every_category_has_multiple_phrasings() {
        let statements = materialize(&[qatar()]);
        for category in [
            Category::Champion,
            Category::RunnerUp,
            Category::Host,
            Category::TopScorer,
        ] {
            let n = statements.iter().filter(|s| s.category == category).count();
            assert!(n >= 3, "{} has only {} statements", category, n);
        }
        assert!(statements.iter().any(|s| s.text.contains('?')));
        assert!(statements.iter().any(|s| s.text.contains(" | ")));
    }

    #[test]
    fn test_missing_field_skips_templates() {
        let mut r = qatar();
        r.top_scorer = Some("   ".to_string());
        r.runner_up = None;
        let statements = materialize(&[r]);

        assert!(statements.iter().all(|s| s.category != Category::TopScorer));
        assert!(statements.iter().all(|s| s.category != Category::RunnerUp));
        assert!(statements.iter().all(|s| !s.text.contains("{")));
        assert!(statements.iter().all(|s| !s.text.contains("  ")));
        // champion statements that need the runner-up are skipped too
        assert!(statements.iter().all(|s| !s.text.contains("derrotou")));
    }

    #[test]
    fn test_record_without_year_is_skipped() {
        let mut bad = qatar();
        bad.year = None;
        let statements = materialize(&[bad, record(2018, "Russia", "France", "Croatia", "Harry Kane - 6")]);
        assert!(!statements.is_empty());
        assert!(statements.iter().all(|s| s.year == Some(2018)));
    }

    #[test]
    fn test_goals_split_from_scorer() {
        let statements = materialize(&[qatar()]);
        assert!(statements
            .iter()
            .any(|s| s.text == "Kylian Mbappé foi o artilheiro da Copa de 2022 com 8 gols."));
        assert!(statements.iter().all(|s| !s.text.contains("Mbappé - 8")));
    }

    #[test]
    fn test_statement_ids_unique() {
        let statements = materialize(&[qatar(), record(2018, "Russia", "France", "Croatia", "Harry Kane - 6")]);
        let ids: HashSet<&str> = statements.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), statements.len());
    }

    #[test]
    fn test_split_scorer() {
        assert_eq!(split_scorer("Gerd Müller - 10"), ("Gerd Müller", Some(10)));
        assert_eq!(split_scorer("Ronaldo"), ("Ronaldo", None));
        assert_eq!(split_scorer("A - B"), ("A - B", None));
    }

    #[test]
    fn test_render_unclosed_brace() {
        assert_eq!(render("{year", |_| Some("x".to_string())), None);
        assert_eq!(render("plain", |_| None), Some("plain".to_string()));
    }

    #[test]
    fn test_matches() {
        let m = MatchRecord {
            year: Some(2022),
            round: Some("Final".to_string()),
            home_team: Some("Argentina".to_string()),
            away_team: Some("France".to_string()),
            home_score: Some(3),
            away_score: Some(3),
            venue: None,
        };
        let statements = materialize_matches(&[m, MatchRecord::default()]);
        assert_eq!(statements.len(), 2); // venue template skipped, default row skipped
        assert_eq!(statements[0].text, "Copa 2022, Final: Argentina 3 x 3 France.");
    }

    #[test]
    fn test_summaries_count_titles() {
        let records = vec![
            record(1958, "Sweden", "Brazil", "Sweden", "Just Fontaine - 13"),
            record(1962, "Chile", "Brazil", "Czechoslovakia", "Garrincha - 4"),
            qatar(),
        ];
        let statements = materialize_summaries(&records);
        assert!(statements
            .iter()
            .any(|s| s.text == "Brazil conquistou 2 Copas do Mundo: 1958, 1962."));
        assert!(statements
            .iter()
            .any(|s| s.text == "Argentina conquistou 1 Copa do Mundo: 2022."));
        assert!(statements.iter().all(|s| s.year.is_none()));
    }
}
