//! Offline index build: data → statements → chunks → embeddings → disk.
//!
//! Chunks are embedded in fixed-size batches. Each batch becomes a partial
//! [`VectorIndex`] that is merged into the cumulative one, so peak memory is
//! bounded by one batch of vectors plus the index itself. A batch whose
//! embedding call fails is logged and skipped; the build fails only when
//! nothing could be embedded.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

use worldcup_rag_core::chunk::{chunk_all, chunk_document, ChunkLevel};
use worldcup_rag_core::embedding::EmbeddingProvider;
use worldcup_rag_core::index::VectorIndex;
use worldcup_rag_core::materialize::{materialize, materialize_matches, materialize_summaries};
use worldcup_rag_core::models::{Chunk, Statement};

use crate::config::Config;
use crate::dataset::{load_dataset, Dataset};
use crate::embedding::select_provider;
use crate::index_store::{read_manifest, save_index, Manifest};

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest: Manifest,
    pub batches: usize,
    pub failed_batches: usize,
    pub failed_chunks: usize,
}

/// Every statement the dataset yields: per-tournament facts, per-match
/// facts, then cross-tournament summaries.
pub fn collect_statements(dataset: &Dataset) -> Vec<Statement> {
    let mut statements = materialize(&dataset.records);
    statements.extend(materialize_matches(&dataset.matches));
    statements.extend(materialize_summaries(&dataset.records));
    statements
}

/// Chunk every statement on its own, plus one document per year (that
/// year's statements joined by newlines) so larger chunks carry neighbouring
/// facts. Statements without a year form one extra document.
pub fn chunk_statements(statements: &[Statement], levels: &[ChunkLevel]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for s in statements {
        chunks.extend(chunk_all(&s.text, std::slice::from_ref(&s.id), levels));
    }

    let mut by_year: BTreeMap<Option<u16>, Vec<&Statement>> = BTreeMap::new();
    for s in statements {
        by_year.entry(s.year).or_default().push(s);
    }

    for group in by_year.values() {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(group.len());
        let mut pos = 0;
        for (i, s) in group.iter().enumerate() {
            if i > 0 {
                text.push('\n');
                pos += 1;
            }
            let len = s.text.chars().count();
            spans.push((s.id.clone(), pos..pos + len));
            text.push_str(&s.text);
            pos += len;
        }
        chunks.extend(chunk_document(&text, &spans, levels));
    }

    chunks
}

/// Embed `chunks` in batches and merge the partial indexes.
///
/// Returns the index and how many batches and chunks failed.
pub async fn embed_chunks(
    chunks: Vec<Chunk>,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<(VectorIndex, usize, usize, usize)> {
    let mut index = VectorIndex::new();
    let mut batches = 0;
    let mut failed_batches = 0;
    let mut failed_chunks = 0;

    let mut iter = chunks.into_iter().peekable();
    while iter.peek().is_some() {
        let batch: Vec<Chunk> = iter.by_ref().take(batch_size.max(1)).collect();
        batches += 1;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let partial = match provider.embed(&texts).await {
            Ok(vectors) => VectorIndex::from_batch(batch, vectors),
            Err(e) => Err(e),
        };
        match partial {
            Ok(partial) => index = index.merge(partial)?,
            Err(e) => {
                warn!(
                    batch = batches,
                    size = texts.len(),
                    error = %format!("{:#}", e),
                    "embedding batch failed, skipping"
                );
                failed_batches += 1;
                failed_chunks += texts.len();
            }
        }
    }

    if index.is_empty() && batches > 0 {
        bail!("Every embedding batch failed; no index was built");
    }

    Ok((index, batches, failed_batches, failed_chunks))
}

/// Build an index from an already-loaded dataset with a given provider.
pub async fn build_from_dataset(
    config: &Config,
    dataset: &Dataset,
    provider: &dyn EmbeddingProvider,
    provider_kind: &str,
) -> Result<(VectorIndex, BuildReport)> {
    let statements = collect_statements(dataset);
    if statements.is_empty() {
        bail!("The dataset produced no statements");
    }
    let chunks = chunk_statements(&statements, &config.chunking.levels);
    info!(
        statements = statements.len(),
        chunks = chunks.len(),
        model = provider.model_name(),
        "embedding chunks"
    );

    let (index, batches, failed_batches, failed_chunks) =
        embed_chunks(chunks, provider, config.index.batch_size).await?;

    let manifest = Manifest {
        build_id: uuid::Uuid::new_v4().to_string(),
        built_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        embedding_provider: provider_kind.to_string(),
        embedding_model: provider.model_name().to_string(),
        dims: provider.dims(),
        chunk_count: index.len(),
        statement_count: statements.len(),
        data_fingerprint: dataset.fingerprint.clone(),
        levels: config.chunking.levels.clone(),
    };

    Ok((
        index,
        BuildReport {
            manifest,
            batches,
            failed_batches,
            failed_chunks,
        },
    ))
}

/// Full offline build: load data, select an embedding model, embed, persist.
pub async fn build_index(config: &Config) -> Result<BuildReport> {
    let dataset = load_dataset(&config.data)?;
    let (pos, provider) = select_provider(&config.embedding).await?;
    let kind = config.embedding.candidates[pos].provider.clone();

    let (index, report) = build_from_dataset(config, &dataset, provider.as_ref(), &kind).await?;
    save_index(&config.index.dir, &index, &report.manifest).await?;
    info!(
        dir = %config.index.dir.display(),
        chunks = report.manifest.chunk_count,
        build_id = %report.manifest.build_id,
        "index saved"
    );
    Ok(report)
}

/// Build the index unless a readable one already exists.
///
/// Returns `None` when the existing index was kept.
pub async fn ensure_index(config: &Config, force: bool) -> Result<Option<BuildReport>> {
    if !force {
        match read_manifest(&config.index.dir).await {
            Ok(Some(manifest)) => {
                if data_changed(config, &manifest) == Some(true) {
                    warn!(
                        build_id = %manifest.build_id,
                        "dataset changed since the index was built; run `wcr build --force` to refresh it"
                    );
                }
                info!(
                    dir = %config.index.dir.display(),
                    build_id = %manifest.build_id,
                    "index exists, skipping build"
                );
                return Ok(None);
            }
            Ok(None) => {}
            Err(e) => warn!(
                error = %format!("{:#}", e),
                "existing index unreadable, rebuilding"
            ),
        }
    }
    Ok(Some(build_index(config).await?))
}

/// Whether the data on disk differs from what `manifest` was built from.
///
/// `None` when the current data cannot be loaded.
pub fn data_changed(config: &Config, manifest: &Manifest) -> Option<bool> {
    match load_dataset(&config.data) {
        Ok(dataset) => Some(dataset.fingerprint != manifest.data_fingerprint),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "could not fingerprint current data");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use worldcup_rag_core::chunk::default_levels;
    use worldcup_rag_core::embedding::HashProvider;
    use worldcup_rag_core::models::{Granularity, Record};

    fn dataset() -> Dataset {
        Dataset {
            records: vec![
                Record {
                    year: Some(2022),
                    host: Some("Qatar".into()),
                    champion: Some("Argentina".into()),
                    runner_up: Some("France".into()),
                    top_scorer: Some("Kylian Mbappé - 8".into()),
                    team_count: Some(32),
                },
                Record {
                    year: Some(2014),
                    host: Some("Brazil".into()),
                    champion: Some("Germany".into()),
                    runner_up: Some("Argentina".into()),
                    top_scorer: Some("James Rodríguez - 6".into()),
                    team_count: Some(32),
                },
            ],
            matches: vec![],
            sources: vec![],
            fingerprint: "f".into(),
        }
    }

    /// Fails every other call.
    struct Flaky {
        inner: HashProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(anyhow!("rate limited"));
            }
            self.inner.embed(texts).await
        }
    }

    #[test]
    fn test_year_documents_group_statements() {
        let statements = collect_statements(&dataset());
        let chunks = chunk_statements(&statements, &default_levels());

        let doc_2022 = statements
            .iter()
            .filter(|s| s.year == Some(2022))
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let multi: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.source_statement_ids.len() > 1)
            .filter(|c| c.source_statement_ids.iter().all(|id| id.starts_with("2022-")))
            .collect();
        assert!(!multi.is_empty());
        for c in &multi {
            assert!(doc_2022.contains(&c.text));
        }
        assert!(chunks
            .iter()
            .any(|c| c.granularity == Granularity::Large && c.source_statement_ids.len() > 1));
    }

    #[test]
    fn test_every_statement_has_its_own_chunk_per_level() {
        let statements = collect_statements(&dataset());
        let chunks = chunk_statements(&statements, &default_levels());
        for s in &statements {
            let own = chunks
                .iter()
                .filter(|c| c.source_statement_ids == vec![s.id.clone()] && c.text == s.text)
                .count();
            assert_eq!(own, 3, "statement {}", s.id);
        }
    }

    #[tokio::test]
    async fn test_batch_order_does_not_change_index() {
        let statements = collect_statements(&dataset());
        let chunks = chunk_statements(&statements, &default_levels());
        let provider = HashProvider::new(64);

        let (a, ..) = embed_chunks(chunks.clone(), &provider, 7).await.unwrap();
        let mut reversed = chunks;
        reversed.reverse();
        let (b, ..) = embed_chunks(reversed, &provider, 50).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_failed_batches_are_skipped() {
        let statements = collect_statements(&dataset());
        let chunks = chunk_statements(&statements, &default_levels());
        let total = chunks.len();
        let provider = Flaky {
            inner: HashProvider::new(32),
            calls: AtomicUsize::new(0),
        };

        let (index, batches, failed_batches, failed_chunks) =
            embed_chunks(chunks, &provider, 10).await.unwrap();
        assert!(batches >= 2);
        assert_eq!(failed_batches, batches / 2);
        assert!(failed_chunks > 0);
        assert!(!index.is_empty());
        assert!(index.len() <= total - failed_chunks);
    }

    #[tokio::test]
    async fn test_build_from_dataset_manifest() {
        let config = Config::default();
        let provider = HashProvider::new(48);
        let (index, report) = build_from_dataset(&config, &dataset(), &provider, "hash")
            .await
            .unwrap();
        assert_eq!(report.manifest.chunk_count, index.len());
        assert_eq!(report.manifest.dims, 48);
        assert_eq!(report.manifest.embedding_model, "hash");
        assert_eq!(report.failed_batches, 0);
        assert_eq!(index.dims(), Some(48));
    }

    #[tokio::test]
    async fn test_existing_index_kept_and_data_change_detected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data = tmp.path().join("wcdataset");
        std::fs::create_dir_all(&data).unwrap();
        let csv = data.join("world_cup.csv");
        std::fs::write(
            &csv,
            "Year,Host,Teams,Champion,Runner-Up,TopScorrer\n2010,South Africa,32,Spain,Netherlands,Thomas Müller - 5\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.data.dir = data;
        config.index.dir = tmp.path().join("wc_index");
        config.embedding.candidates = vec![crate::config::EmbeddingCandidate::hash(32)];

        let built = ensure_index(&config, false).await.unwrap().unwrap();
        assert_eq!(data_changed(&config, &built.manifest), Some(false));

        std::fs::write(
            &csv,
            "Year,Host,Teams,Champion,Runner-Up,TopScorrer\n2014,Brazil,32,Germany,Argentina,James Rodríguez - 6\n",
        )
        .unwrap();
        assert_eq!(data_changed(&config, &built.manifest), Some(true));

        // a stale index is reported, not rebuilt
        assert!(ensure_index(&config, false).await.unwrap().is_none());
        let (_, manifest) = crate::index_store::load_index(&config.index.dir).await.unwrap();
        assert_eq!(manifest.build_id, built.manifest.build_id);

        std::fs::remove_file(&csv).unwrap();
        assert_eq!(data_changed(&config, &built.manifest), None);
    }
}
