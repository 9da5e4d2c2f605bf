use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::database_ops::pacing::{FixedInterval, RateLimiter, TokioSleeper};
use crate::database_ops::resolution::Resolver;
use crate::database_ops::store::ResolutionStatus;
use crate::util::env::{env_flag, env_parse, env_parse_opt};

pub const DEFAULT_DELAY_MS: u64 = 1500;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Report what would run; no catalog calls, no writes.
    pub dry_run: bool,
    pub limit: Option<u32>,
    /// Pause between consecutive records.
    pub delay: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl BackfillOptions {
    pub fn from_env() -> Self {
        Self {
            dry_run: env_flag("BACKFILL_DRY_RUN", false),
            limit: env_parse_opt("BACKFILL_LIMIT"),
            delay: Duration::from_millis(env_parse("BACKFILL_DELAY_MS", DEFAULT_DELAY_MS)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub selected: usize,
    pub ok: usize,
    pub missing: usize,
    pub ambiguous: usize,
    pub error: usize,
    pub disabled: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

impl BackfillSummary {
    fn record(&mut self, status: ResolutionStatus) {
        match status {
            ResolutionStatus::Ok => self.ok += 1,
            ResolutionStatus::Missing => self.missing += 1,
            ResolutionStatus::Ambiguous => self.ambiguous += 1,
            ResolutionStatus::Error => self.error += 1,
            ResolutionStatus::Disabled => self.disabled += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.ok + self.missing + self.ambiguous + self.error + self.disabled
    }
}

/// Sequential re-resolution of every record that lacks art or has a non-ok status.
pub struct Backfill {
    resolver: Arc<Resolver>,
    limiter: Arc<dyn RateLimiter>,
    options: BackfillOptions,
}

impl Backfill {
    pub fn new(resolver: Arc<Resolver>, limiter: Arc<dyn RateLimiter>, options: BackfillOptions) -> Self {
        Self {
            resolver,
            limiter,
            options,
        }
    }

    /// Paces records with a fixed interval of `options.delay` on the tokio clock.
    pub fn with_fixed_interval(resolver: Arc<Resolver>, options: BackfillOptions) -> Self {
        let limiter = Arc::new(FixedInterval::new(options.delay, Arc::new(TokioSleeper)));
        Self::new(resolver, limiter, options)
    }

    pub async fn run(&self) -> Result<BackfillSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until done or until `shutdown` resolves; shutdown is honoured between records.
    ///
    /// Only candidate selection can fail the batch. A failing record is marked
    /// `error` and the loop moves on.
    #[instrument(skip(self, shutdown), fields(dry_run = self.options.dry_run, limit = ?self.options.limit))]
    pub async fn run_until<F>(&self, shutdown: F) -> Result<BackfillSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let records = self
            .resolver
            .store()
            .select_backfill(self.options.limit)
            .await
            .context("selecting backfill candidates")?;
        let total = records.len();
        let mut summary = BackfillSummary {
            selected: total,
            ..BackfillSummary::default()
        };
        info!(
            total,
            delay_ms = self.options.delay.as_millis() as u64,
            enabled = self.resolver.is_enabled(),
            "backfill: starting"
        );

        for (idx, record) in records.iter().enumerate() {
            let position = idx + 1;
            if self.options.dry_run {
                info!(
                    position,
                    total,
                    game_id = record.id,
                    name = %record.name,
                    status = record.resolution_status.map(|s| s.as_str()).unwrap_or("none"),
                    has_image = record.image_url.is_some(),
                    "backfill: would resolve"
                );
                summary.skipped += 1;
                continue;
            }

            // Disabled runs make no catalog calls, so there is nothing to pace.
            let paced = async {
                if self.resolver.is_enabled() {
                    self.limiter.acquire().await;
                }
            };
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(position, total, "backfill: interrupted; stopping before next record");
                    summary.interrupted = true;
                    break;
                }
                _ = paced => {}
            }

            let status = match self.resolver.resolve(record.id, None).await {
                Ok(report) => report.status,
                Err(err) => {
                    warn!(game_id = record.id, name = %record.name, error = %format!("{err:#}"), "backfill: record failed");
                    if let Err(write_err) = self.resolver.mark_error(record.id).await {
                        error!(game_id = record.id, error = %format!("{write_err:#}"), "backfill: could not record error status");
                    }
                    ResolutionStatus::Error
                }
            };
            summary.record(status);
            info!(position, total, game_id = record.id, name = %record.name, status = %status, "backfill: resolved");
        }

        info!(
            selected = summary.selected,
            ok = summary.ok,
            missing = summary.missing,
            ambiguous = summary.ambiguous,
            error = summary.error,
            disabled = summary.disabled,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            "backfill: finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::bgg::CatalogConfig;
    use crate::database_ops::store::GameRecord;
    use crate::testing::{MemoryGameStore, RecordingSleeper, Scripted, ScriptedHttp};

    fn search_hit(id: i64, name: &str) -> Scripted {
        Scripted::ok(&format!(
            r#"<items><item type="boardgame" id="{id}"><name type="primary" value="{name}"/></item></items>"#
        ))
    }

    fn thing(id: i64) -> Scripted {
        Scripted::ok(&format!(
            r#"<items><item type="boardgame" id="{id}"><image>https://img.test/{id}.jpg</image></item></items>"#
        ))
    }

    struct Harness {
        store: Arc<MemoryGameStore>,
        http: Arc<ScriptedHttp>,
        sleeper: Arc<RecordingSleeper>,
        backfill: Backfill,
    }

    fn harness(records: Vec<GameRecord>, script: Vec<Scripted>, options: BackfillOptions) -> Harness {
        let cfg = CatalogConfig {
            base_url: "https://catalog.test".into(),
            ..CatalogConfig::default().with_token("t")
        };
        harness_with(cfg, records, script, options)
    }

    fn harness_with(
        cfg: CatalogConfig,
        records: Vec<GameRecord>,
        script: Vec<Scripted>,
        options: BackfillOptions,
    ) -> Harness {
        let store = Arc::new(MemoryGameStore::with_records(records));
        let http = Arc::new(ScriptedHttp::new(script));
        let sleeper = Arc::new(RecordingSleeper::default());
        let resolver = Arc::new(Resolver::new(
            store.clone(),
            &cfg,
            http.clone(),
            Arc::new(RecordingSleeper::default()),
        ));
        let limiter = Arc::new(FixedInterval::new(options.delay, sleeper.clone()));
        Harness {
            store,
            http,
            sleeper,
            backfill: Backfill::new(resolver, limiter, options),
        }
    }

    fn games(names: &[&str]) -> Vec<GameRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| GameRecord::new(i as i64 + 1, *n))
            .collect()
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let h = harness(
            games(&["Azul", "Brass", "Carcassonne"]),
            vec![],
            BackfillOptions {
                dry_run: true,
                ..BackfillOptions::default()
            },
        );

        let summary = h.backfill.run().await.unwrap();

        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.processed(), 0);
        assert!(h.http.requests().is_empty());
        assert!(h.store.writes().is_empty());
        assert!(h.sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn disabled_backfill_writes_disabled_without_requests() {
        let h = harness_with(
            CatalogConfig::default(),
            games(&["Azul", "Brass", "Carcassonne"]),
            vec![],
            BackfillOptions {
                delay: Duration::from_millis(10),
                ..BackfillOptions::default()
            },
        );

        let summary = h.backfill.run().await.unwrap();

        assert_eq!(summary.selected, 3);
        assert_eq!(summary.disabled, 3);
        assert_eq!(summary.processed(), 3);
        assert!(h.http.requests().is_empty());
        assert!(h.sleeper.slept().is_empty());
        assert_eq!(h.store.writes().len(), 3);
        for id in 1..=3 {
            let record = h.store.record(id).unwrap();
            assert_eq!(record.resolution_status, Some(ResolutionStatus::Disabled));
            assert!(record.status_updated_at.is_some());
        }
    }

    #[tokio::test]
    async fn one_failing_record_does_not_abort_the_batch() {
        let names = ["Azul", "Brass", "Carcassonne", "Dominion", "Everdell"];
        let h = harness(
            games(&names),
            vec![
                search_hit(101, "Azul"),
                thing(101),
                search_hit(102, "Brass"),
                thing(102),
                // Carcassonne fails before any request is made.
                search_hit(104, "Dominion"),
                thing(104),
                search_hit(105, "Everdell"),
                thing(105),
            ],
            BackfillOptions {
                delay: Duration::from_millis(10),
                ..BackfillOptions::default()
            },
        );
        h.store.fail_reads_for(3);

        let summary = h.backfill.run().await.unwrap();

        assert_eq!(summary.ok, 4);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.selected, 5);
        assert!(!summary.interrupted);
        for id in [1, 2, 4, 5] {
            assert_eq!(
                h.store.record(id).unwrap().resolution_status,
                Some(ResolutionStatus::Ok)
            );
        }
        let failed = h.store.record(3).unwrap();
        assert_eq!(failed.resolution_status, Some(ResolutionStatus::Error));
        assert!(failed.status_updated_at.is_some());
        assert_eq!(h.sleeper.slept(), vec![Duration::from_millis(10); 4]);
    }

    #[tokio::test]
    async fn processes_in_name_order_and_honours_limit() {
        let h = harness(
            games(&["Wingspan", "Agricola", "Root"]),
            vec![
                Scripted::ok(r#"<items total="0"/>"#),
                Scripted::ok(r#"<items total="0"/>"#),
            ],
            BackfillOptions {
                limit: Some(2),
                ..BackfillOptions::default()
            },
        );

        let summary = h.backfill.run().await.unwrap();

        assert_eq!(summary.selected, 2);
        assert_eq!(summary.missing, 2);
        let requests = h.http.requests();
        assert!(requests[0].ends_with("query=agricola"));
        assert!(requests[1].ends_with("query=root"));
        assert_eq!(h.store.record(1).unwrap().resolution_status, None);
    }

    #[tokio::test]
    async fn skips_records_that_are_already_resolved() {
        let mut done = GameRecord::new(1, "Azul");
        done.resolution_status = Some(ResolutionStatus::Ok);
        done.image_url = Some("https://img.test/azul.jpg".into());
        let mut no_art = GameRecord::new(2, "Brass");
        no_art.resolution_status = Some(ResolutionStatus::Ok);

        let h = harness(
            vec![done, no_art],
            vec![search_hit(102, "Brass"), thing(102)],
            BackfillOptions::default(),
        );

        let summary = h.backfill.run().await.unwrap();

        assert_eq!(summary.selected, 1);
        assert_eq!(summary.ok, 1);
        assert_eq!(h.store.writes().len(), 1);
        assert_eq!(h.store.writes()[0].0, 2);
    }

    #[tokio::test]
    async fn shutdown_stops_before_the_next_record() {
        let h = harness(games(&["Azul", "Brass"]), vec![], BackfillOptions::default());

        let summary = h.backfill.run_until(std::future::ready(())).await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.selected, 2);
        assert_eq!(summary.processed(), 0);
        assert!(h.store.writes().is_empty());
    }
}
