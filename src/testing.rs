//! In-memory fakes shared by unit tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::database_ops::bgg::transport::{HttpGet, RawResponse};
use crate::database_ops::pacing::Sleeper;
use crate::database_ops::store::{
    CatalogFields, GameId, GameRecord, GameStore, ResolutionUpdate,
};

#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub enum Scripted {
    Response(StatusCode, String),
    NetworkError,
}

impl Scripted {
    pub fn ok(body: &str) -> Self {
        Scripted::Response(StatusCode::OK, body.to_string())
    }

    pub fn status(status: StatusCode) -> Self {
        Scripted::Response(status, String::new())
    }
}

/// Replays responses in order; an exhausted script behaves like a dead network.
pub struct ScriptedHttp {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedHttp {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bearer)| bearer.clone())
            .collect()
    }
}

#[async_trait]
impl HttpGet for ScriptedHttp {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), bearer.map(String::from)));
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Response(status, body)) => Ok(RawResponse { status, body }),
            Some(Scripted::NetworkError) => Err(anyhow!("connection reset by peer")),
            None => Err(anyhow!("no scripted response for {url}")),
        }
    }
}

#[derive(Default)]
pub struct MemoryGameStore {
    records: Mutex<BTreeMap<GameId, GameRecord>>,
    writes: Mutex<Vec<(GameId, ResolutionUpdate)>>,
    failing_reads: Mutex<HashSet<GameId>>,
}

impl MemoryGameStore {
    pub fn with_records(records: impl IntoIterator<Item = GameRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.records.lock().unwrap();
            for r in records {
                map.insert(r.id, r);
            }
        }
        store
    }

    /// Make `get_record(id)` fail, as a broken row or dropped connection would.
    pub fn fail_reads_for(&self, id: GameId) {
        self.failing_reads.lock().unwrap().insert(id);
    }

    pub fn record(&self, id: GameId) -> Option<GameRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn writes(&self) -> Vec<(GameId, ResolutionUpdate)> {
        self.writes.lock().unwrap().clone()
    }
}

fn apply(record: &mut GameRecord, update: &ResolutionUpdate) {
    record.resolution_status = Some(update.status);
    record.status_updated_at = Some(update.updated_at);
    match &update.fields {
        CatalogFields::Keep => {}
        CatalogFields::Clear => {
            record.catalog_id = None;
            record.image_url = None;
            record.thumbnail_url = None;
            record.image_source = None;
        }
        CatalogFields::Matched { catalog_id } => {
            record.catalog_id = Some(*catalog_id);
            record.image_url = None;
            record.thumbnail_url = None;
            record.image_source = None;
        }
        CatalogFields::Resolved {
            catalog_id,
            image_url,
            thumbnail_url,
            image_source,
        } => {
            record.catalog_id = Some(*catalog_id);
            record.image_url = Some(image_url.clone());
            record.thumbnail_url = thumbnail_url.clone();
            record.image_source = Some(image_source.clone());
        }
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn get_record(&self, id: GameId) -> Result<Option<GameRecord>> {
        if self.failing_reads.lock().unwrap().contains(&id) {
            bail!("simulated read failure for game {id}");
        }
        Ok(self.record(id))
    }

    async fn write_resolution(&self, id: GameId, update: &ResolutionUpdate) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("game {id} not found"))?;
        apply(record, update);
        self.writes.lock().unwrap().push((id, update.clone()));
        Ok(())
    }

    async fn select_backfill(&self, limit: Option<u32>) -> Result<Vec<GameRecord>> {
        let mut picked: Vec<GameRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.needs_backfill())
            .cloned()
            .collect();
        picked.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            picked.truncate(limit as usize);
        }
        Ok(picked)
    }
}
