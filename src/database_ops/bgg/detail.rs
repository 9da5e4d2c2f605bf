use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

use super::xml::{ParseFailure, ITEM, ROOT};
use super::CatalogClient;

/// Artwork URLs from a detail payload. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailImages {
    pub image: Option<String>,
    pub thumbnail: Option<String>,
}

impl CatalogClient {
    /// Artwork for a matched catalog id. `None` means the transport gave up;
    /// an unreadable payload reads as "no image".
    pub async fn fetch_details(&self, external_id: i64) -> Option<DetailImages> {
        let url = self.detail_url(external_id);
        let body = self.fetch(&url).await?;
        let images = parse_detail_response(&body).unwrap_or_else(|failure| {
            debug!(external_id, reason = %failure, "unreadable detail response; treating as no image");
            DetailImages::default()
        });
        info!(
            external_id,
            has_image = images.image.is_some(),
            has_thumbnail = images.thumbnail.is_some(),
            "catalog detail"
        );
        Some(images)
    }
}

#[derive(Clone, Copy)]
enum Field {
    Image,
    Thumbnail,
}

/// Parse the first `<item>` of a detail payload for its `image`/`thumbnail` text.
pub fn parse_detail_response(xml: &str) -> Result<DetailImages, ParseFailure> {
    if xml.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut in_item = false;
    let mut saw_item = false;
    let mut field: Option<Field> = None;
    let mut images = DetailImages::default();

    loop {
        match reader.read_event().map_err(ParseFailure::malformed)? {
            Event::Start(e) => {
                let name = e.name();
                if !saw_root {
                    if name.as_ref() != ROOT {
                        return Err(ParseFailure::MissingRoot);
                    }
                    saw_root = true;
                    continue;
                }
                match name.as_ref() {
                    ITEM if !saw_item => {
                        saw_item = true;
                        in_item = true;
                    }
                    b"image" if in_item => field = Some(Field::Image),
                    b"thumbnail" if in_item => field = Some(Field::Thumbnail),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if !saw_root {
                    if e.name().as_ref() != ROOT {
                        return Err(ParseFailure::MissingRoot);
                    }
                    return Err(ParseFailure::MissingItem);
                }
                if e.name().as_ref() == ITEM && !saw_item {
                    // Self-closing item: present but carries no artwork.
                    return Ok(images);
                }
            }
            Event::Text(t) => {
                if let Some(f) = field {
                    let text = t.unescape().map_err(ParseFailure::malformed)?;
                    set_once(&mut images, f, &text);
                }
            }
            Event::CData(c) => {
                if let Some(f) = field {
                    let raw = c.into_inner();
                    set_once(&mut images, f, &String::from_utf8_lossy(&raw));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"image" | b"thumbnail" => field = None,
                ITEM if in_item => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(ParseFailure::MissingRoot);
    }
    if !saw_item {
        return Err(ParseFailure::MissingItem);
    }
    Ok(images)
}

fn set_once(images: &mut DetailImages, field: Field, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let slot = match field {
        Field::Image => &mut images.image,
        Field::Thumbnail => &mut images.thumbnail,
    };
    if slot.is_none() {
        *slot = Some(text.to_string());
    }
}
