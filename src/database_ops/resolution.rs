//! Per-record resolution pipeline and the status machine that persists its outcome.
//!
//! Every run ends in exactly one [`ResolutionStatus`]; the only writes to the
//! catalog/art columns go through [`commit`].

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::database_ops::bgg::{
    pick_best_match, CatalogClient, CatalogConfig, DetailImages, HttpGet, MatchOutcome,
};
use crate::database_ops::pacing::Sleeper;
use crate::database_ops::store::{
    CatalogFields, GameId, GameStore, ResolutionStatus, ResolutionUpdate,
};

/// Terminal result of one pipeline run, before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// No credential configured; nothing was sent.
    Disabled,
    /// Search succeeded with zero candidates.
    NotFound,
    Ambiguous,
    /// The transport gave up during search.
    SearchFailed,
    /// Matched, but the transport gave up fetching details.
    DetailFailed { catalog_id: i64 },
    /// Matched and detail fetched, but the catalog has no image.
    NoImage { catalog_id: i64 },
    Resolved {
        catalog_id: i64,
        image_url: String,
        thumbnail_url: Option<String>,
    },
}

impl PipelineOutcome {
    pub fn status(&self) -> ResolutionStatus {
        match self {
            PipelineOutcome::Disabled => ResolutionStatus::Disabled,
            PipelineOutcome::NotFound | PipelineOutcome::NoImage { .. } => {
                ResolutionStatus::Missing
            }
            PipelineOutcome::Ambiguous => ResolutionStatus::Ambiguous,
            PipelineOutcome::SearchFailed | PipelineOutcome::DetailFailed { .. } => {
                ResolutionStatus::Error
            }
            PipelineOutcome::Resolved { .. } => ResolutionStatus::Ok,
        }
    }

    /// The record mutation for this outcome.
    ///
    /// Transport failures only touch status and timestamp so last-known-good art survives.
    /// A match without an image still persists the catalog id.
    pub fn to_update(&self, image_source: &str, now: DateTime<Utc>) -> ResolutionUpdate {
        let fields = match self {
            PipelineOutcome::Disabled | PipelineOutcome::NotFound | PipelineOutcome::Ambiguous => {
                CatalogFields::Clear
            }
            PipelineOutcome::SearchFailed | PipelineOutcome::DetailFailed { .. } => {
                CatalogFields::Keep
            }
            PipelineOutcome::NoImage { catalog_id } => CatalogFields::Matched {
                catalog_id: *catalog_id,
            },
            PipelineOutcome::Resolved {
                catalog_id,
                image_url,
                thumbnail_url,
            } => CatalogFields::Resolved {
                catalog_id: *catalog_id,
                image_url: image_url.clone(),
                thumbnail_url: thumbnail_url.clone(),
                image_source: image_source.to_string(),
            },
        };
        ResolutionUpdate {
            status: self.status(),
            fields,
            updated_at: now,
        }
    }
}

/// What the interactive trigger hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub game_id: GameId,
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl ResolutionReport {
    fn new(game_id: GameId, outcome: &PipelineOutcome) -> Self {
        let (catalog_id, image_url, thumbnail_url) = match outcome {
            PipelineOutcome::NoImage { catalog_id } => (Some(*catalog_id), None, None),
            PipelineOutcome::Resolved {
                catalog_id,
                image_url,
                thumbnail_url,
            } => (
                Some(*catalog_id),
                Some(image_url.clone()),
                thumbnail_url.clone(),
            ),
            _ => (None, None, None),
        };
        Self {
            game_id,
            status: outcome.status(),
            catalog_id,
            image_url,
            thumbnail_url,
        }
    }
}

/// Status machine write: stamps `now` and persists the outcome's field mutation.
pub async fn commit(
    store: &dyn GameStore,
    id: GameId,
    outcome: &PipelineOutcome,
    image_source: &str,
) -> Result<ResolutionUpdate> {
    let update = outcome.to_update(image_source, Utc::now());
    store
        .write_resolution(id, &update)
        .await
        .with_context(|| format!("persisting {} for game {id}", update.status))?;
    Ok(update)
}

/// Runs the catalog pipeline for single records and commits each outcome.
pub struct Resolver {
    store: Arc<dyn GameStore>,
    catalog: Option<CatalogClient>,
    image_source: String,
}

impl Resolver {
    /// Without a token in `config` the resolver is disabled and never touches the network.
    pub fn new(
        store: Arc<dyn GameStore>,
        config: &CatalogConfig,
        http: Arc<dyn HttpGet>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let catalog = config
            .is_enabled()
            .then(|| CatalogClient::new(config, http, sleeper));
        Self {
            store,
            catalog,
            image_source: config.image_source.clone(),
        }
    }

    pub fn from_config(store: Arc<dyn GameStore>, config: &CatalogConfig) -> Result<Self> {
        let catalog = if config.is_enabled() {
            Some(CatalogClient::from_config(config)?)
        } else {
            None
        };
        Ok(Self {
            store,
            catalog,
            image_source: config.image_source.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.catalog.is_some()
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Search → match → detail for `name`. Pure with respect to the record store.
    pub async fn run_pipeline(&self, name: &str) -> PipelineOutcome {
        let Some(catalog) = &self.catalog else {
            return PipelineOutcome::Disabled;
        };

        let candidates = match catalog.search(name).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "catalog search failed");
                return PipelineOutcome::SearchFailed;
            }
        };

        let catalog_id = match pick_best_match(&candidates, name) {
            MatchOutcome::Missing => return PipelineOutcome::NotFound,
            MatchOutcome::Ambiguous => return PipelineOutcome::Ambiguous,
            MatchOutcome::Matched { external_id } => external_id,
        };

        match catalog.fetch_details(catalog_id).await {
            None => PipelineOutcome::DetailFailed { catalog_id },
            Some(DetailImages {
                image: Some(image_url),
                thumbnail,
            }) => PipelineOutcome::Resolved {
                catalog_id,
                image_url,
                thumbnail_url: thumbnail,
            },
            Some(_) => PipelineOutcome::NoImage { catalog_id },
        }
    }

    /// Interactive trigger: resolve one record (optionally under a different name) and persist.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        id: GameId,
        name_override: Option<&str>,
    ) -> Result<ResolutionReport> {
        let outcome = if self.catalog.is_none() {
            PipelineOutcome::Disabled
        } else {
            let record = self
                .store
                .get_record(id)
                .await?
                .ok_or_else(|| anyhow!("game {id} not found"))?;
            let name = name_override.unwrap_or(&record.name);
            self.run_pipeline(name).await
        };
        commit(self.store.as_ref(), id, &outcome, &self.image_source).await?;
        let report = ResolutionReport::new(id, &outcome);
        info!(game_id = id, status = %report.status, catalog_id = ?report.catalog_id, "resolution committed");
        Ok(report)
    }

    /// Record an `error` outcome without touching catalog id or art.
    pub async fn mark_error(&self, id: GameId) -> Result<()> {
        commit(
            self.store.as_ref(),
            id,
            &PipelineOutcome::SearchFailed,
            &self.image_source,
        )
        .await
        .map(|_| ())
    }
}
