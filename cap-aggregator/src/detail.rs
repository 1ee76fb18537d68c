use crate::geometry::parse_polygon_set;
use crate::traits::{FetchedDocument, Fetcher};
use crate::types::{AggregatorError, AlertDetail, Area, Result, Severity};
use chrono::DateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CapParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unexpected CAP structure: {0}")]
    Structure(#[from] quick_xml::DeError),

    #[error("document has no root element")]
    NoRootElement,

    #[error("text before the root element")]
    TextBeforeRoot,
}

#[derive(Debug, Deserialize)]
struct CapAlert {
    #[serde(rename = "info", default)]
    info: Vec<CapInfo>,
}

#[derive(Debug, Deserialize)]
struct CapInfo {
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    onset: Option<String>,
    #[serde(rename = "area", default)]
    areas: Vec<CapArea>,
}

#[derive(Debug, Deserialize)]
struct CapArea {
    #[serde(rename = "areaDesc", default)]
    area_desc: Option<String>,
    #[serde(rename = "polygon", default)]
    polygons: Vec<String>,
}

/// Resolves an alert's detail URL into its CAP `info` blocks.
pub struct DetailResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl DetailResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn resolve(&self, url: &str) -> Result<Vec<AlertDetail>> {
        debug!("Retrieving alert detail for {}", url);

        let document = self
            .fetcher
            .fetch(url)
            .await
            .and_then(FetchedDocument::error_for_status)
            .map_err(|source| AggregatorError::DetailTransport {
                url: url.to_string(),
                source,
            })?;

        parse_cap_document(&document.text()).map_err(|e| AggregatorError::DetailParse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Extract `alert.info[]` from a CAP document. A document whose root is not
/// `<alert>`, or an alert without `<info>`, yields no details. A body that
/// is not XML is an error.
pub fn parse_cap_document(text: &str) -> std::result::Result<Vec<AlertDetail>, CapParseError> {
    if !root_is_alert(text)? {
        debug!("Document root is not a CAP alert; no details");
        return Ok(Vec::new());
    }

    let alert: CapAlert = quick_xml::de::from_str(text)?;
    Ok(alert.info.into_iter().map(convert_info).collect())
}

fn root_is_alert(text: &str) -> std::result::Result<bool, CapParseError> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => return Ok(e.local_name().as_ref() == b"alert"),
            Event::Text(t) if !t.iter().all(u8::is_ascii_whitespace) => {
                return Err(CapParseError::TextBeforeRoot)
            }
            Event::CData(_) => return Err(CapParseError::TextBeforeRoot),
            Event::Eof => return Err(CapParseError::NoRootElement),
            _ => {}
        }
    }
}

fn convert_info(info: CapInfo) -> AlertDetail {
    let onset = info.onset.as_deref().map(str::trim).filter(|s| !s.is_empty()).and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map_err(|e| warn!("Ignoring unparsable CAP onset {:?}: {}", raw, e))
            .ok()
    });

    AlertDetail {
        severity: Severity::from(info.severity.as_deref().unwrap_or_default()),
        event: info.event.unwrap_or_default().trim().to_string(),
        onset,
        areas: info.areas.into_iter().map(convert_area).collect(),
    }
}

fn convert_area(area: CapArea) -> Area {
    let description = area.area_desc.unwrap_or_default().trim().to_string();
    let parsed = parse_polygon_set(&area.polygons);

    let failed = parsed.iter().filter(|polygon| polygon.is_none()).count();
    if failed > 0 {
        warn!("Skipping {} unparsable polygon(s) in area {:?}", failed, description);
    }

    Area {
        description,
        polygons: parsed.into_iter().flatten().collect(),
    }
}
