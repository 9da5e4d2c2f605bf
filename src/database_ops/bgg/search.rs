use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, info};

use super::xml::{attr, ParseFailure, ITEM, ROOT};
use super::{CandidateMatch, CatalogClient};
use crate::normalization::normalize;

const BOARDGAME_TYPE: &str = "boardgame";

/// The transport gave up before a search response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("catalog search failed for {query:?}")]
pub struct SearchFailed {
    pub query: String,
}

impl CatalogClient {
    /// Board-game candidates for `name`.
    ///
    /// A transport failure is `Err`; an unreadable payload is indistinguishable from
    /// "no results" and comes back as an empty list.
    pub async fn search(&self, name: &str) -> Result<Vec<CandidateMatch>, SearchFailed> {
        let query = normalize(name);
        let url = self.search_url(&query);
        let Some(body) = self.fetch(&url).await else {
            return Err(SearchFailed { query });
        };
        match parse_search_response(&body) {
            Ok(candidates) => {
                info!(query = %query, candidates = candidates.len(), "catalog search");
                Ok(candidates)
            }
            Err(failure) => {
                debug!(query = %query, reason = %failure, "unreadable search response; treating as no results");
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Default)]
struct PendingItem {
    kind: Option<String>,
    id: Option<String>,
    // (type attribute, value attribute)
    names: Vec<(Option<String>, String)>,
    year: Option<i32>,
}

impl PendingItem {
    fn finish(self) -> Option<CandidateMatch> {
        if self.kind.as_deref() != Some(BOARDGAME_TYPE) {
            return None;
        }
        let external_id = self
            .id
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)?;
        let name = self
            .names
            .iter()
            .find(|(kind, _)| kind.as_deref() == Some("primary"))
            .or_else(|| self.names.first())
            .map(|(_, value)| value.trim().to_string())
            .filter(|n| !n.is_empty())?;
        Some(CandidateMatch {
            external_id,
            name,
            year_published: self.year,
        })
    }
}

/// Parse a search payload into board-game candidates, in response order.
pub fn parse_search_response(xml: &str) -> Result<Vec<CandidateMatch>, ParseFailure> {
    if xml.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut current: Option<PendingItem> = None;
    let mut out = Vec::new();

    loop {
        let (element, self_closing) = match reader.read_event().map_err(ParseFailure::malformed)? {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::End(e) => {
                if e.name().as_ref() == ITEM {
                    if let Some(candidate) = current.take().and_then(PendingItem::finish) {
                        out.push(candidate);
                    }
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        if !saw_root {
            if element.name().as_ref() != ROOT {
                return Err(ParseFailure::MissingRoot);
            }
            saw_root = true;
            continue;
        }

        match element.name().as_ref() {
            ITEM => {
                let item = PendingItem {
                    kind: attr(&element, b"type")?,
                    id: attr(&element, b"id")?,
                    ..PendingItem::default()
                };
                if self_closing {
                    out.extend(item.finish());
                } else {
                    current = Some(item);
                }
            }
            b"name" => {
                if let Some(item) = current.as_mut() {
                    if let Some(value) = attr(&element, b"value")? {
                        item.names.push((attr(&element, b"type")?, value));
                    }
                }
            }
            b"yearpublished" => {
                if let Some(item) = current.as_mut() {
                    item.year = attr(&element, b"value")?.and_then(|v| v.trim().parse().ok());
                }
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(ParseFailure::MissingRoot);
    }
    Ok(out)
}
