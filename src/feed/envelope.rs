// src/feed/envelope.rs
//
// Wire shapes for the EMSC standing-order feed. Messages arrive as JSON
// text frames; a record of interest carries `data.properties` with the
// event fields. Anything that fails to parse is dropped by the connector.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct RawFeedEnvelope {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeData {
    #[serde(default)]
    pub properties: Option<EventProperties>,
}

/// Event section as the feed sends it. Numeric fields are kept as raw JSON
/// values because the feed occasionally encodes numbers as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct EventProperties {
    #[serde(default)]
    pub mag: Option<Value>,
    #[serde(default)]
    pub lat: Option<Value>,
    #[serde(default)]
    pub lon: Option<Value>,
    #[serde(default)]
    pub flynn_region: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub unid: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub depth: Option<Value>,
}

/// Normalized candidate handed to the classifier. Fields stay optional here;
/// the classifier owns the presence/finiteness decision and its reject reason.
#[derive(Debug, Clone, PartialEq)]
pub struct EarthquakeCandidate {
    pub magnitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub region: Option<String>,
    pub authority: Option<String>,
    pub source_id: Option<String>,
    pub time: Option<String>,
    pub depth: Option<f64>,
}

impl From<EventProperties> for EarthquakeCandidate {
    fn from(p: EventProperties) -> Self {
        Self {
            magnitude: p.mag.as_ref().and_then(lenient_f64),
            latitude: p.lat.as_ref().and_then(lenient_f64),
            longitude: p.lon.as_ref().and_then(lenient_f64),
            region: p.flynn_region,
            authority: p.auth,
            source_id: p.unid,
            time: p.time,
            depth: p.depth.as_ref().and_then(lenient_f64),
        }
    }
}

/// Accept a JSON number or a numeric string. Garbage becomes `None`, which
/// the classifier rejects as invalid data.
fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
