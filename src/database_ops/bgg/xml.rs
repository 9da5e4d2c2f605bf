use quick_xml::events::BytesStart;
use std::fmt::Display;
use thiserror::Error;

/// Why a catalog XML payload could not be read. Callers decide how soft each case is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("empty response body")]
    Empty,
    #[error("expected <items> root element")]
    MissingRoot,
    #[error("no <item> element in response")]
    MissingItem,
    #[error("malformed xml: {0}")]
    Malformed(String),
}

impl ParseFailure {
    pub(crate) fn malformed(err: impl Display) -> Self {
        Self::Malformed(err.to_string())
    }
}

pub(crate) const ROOT: &[u8] = b"items";
pub(crate) const ITEM: &[u8] = b"item";

/// Unescaped value of attribute `key`, if present.
pub(crate) fn attr(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ParseFailure> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(ParseFailure::malformed)?;
        if attribute.key.as_ref() == key {
            let value = attribute
                .unescape_value()
                .map_err(ParseFailure::malformed)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
