use serde::{Deserialize, Deserializer, Serialize};

/// One observed bus position at one instant, deserialized from the raw
/// BusTime field names and serialized under the collector's own names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    #[serde(rename(deserialize = "vid"), deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename(deserialize = "tmstmp"))]
    pub timestamp: String,
    #[serde(deserialize_with = "f64_or_string")]
    pub lat: f64,
    #[serde(deserialize_with = "f64_or_string")]
    pub lon: f64,
    #[serde(rename(deserialize = "des"))]
    pub destination: String,
    #[serde(rename(deserialize = "pid"), deserialize_with = "u64_or_string")]
    pub pattern_id: u64,
    #[serde(rename(deserialize = "pdist"), deserialize_with = "f64_or_string")]
    pub pattern_distance: f64,
    #[serde(
        rename(deserialize = "tatripid"),
        deserialize_with = "string_or_number",
        default
    )]
    pub trip_id: String,
    #[serde(rename(deserialize = "spd"), deserialize_with = "f64_or_string")]
    pub speed: f64,
    #[serde(rename(deserialize = "psgld"))]
    pub passenger_load: String,
}

/// One predicted arrival of one vehicle at one stop. The type code is
/// consumed by the arrival filter and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(rename(deserialize = "tmstmp"))]
    pub timestamp: String,
    #[serde(rename(deserialize = "stpid"), deserialize_with = "string_or_number")]
    pub stop_id: String,
    #[serde(rename(deserialize = "vid"), deserialize_with = "string_or_number")]
    pub vehicle_id: String,
    #[serde(rename(deserialize = "prdtm"))]
    pub predicted_time: String,
    #[serde(
        rename(deserialize = "tatripid"),
        deserialize_with = "string_or_number",
        default
    )]
    pub trip_id: String,
    #[serde(rename(deserialize = "dstp"), deserialize_with = "f64_or_string")]
    pub distance_to_stop: f64,
    #[serde(rename(deserialize = "typ"), skip_serializing)]
    pub kind: String,
}

impl VehicleRecord {
    /// Identity for exact-duplicate collapse at checkpoint time. The unit
    /// separator keeps free-text fields from aliasing across positions.
    pub fn key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.id,
            self.timestamp,
            self.lat,
            self.lon,
            self.destination,
            self.pattern_id,
            self.pattern_distance,
            self.trip_id,
            self.speed,
            self.passenger_load
        )
    }
}

impl PredictionRecord {
    pub fn is_arrival(&self) -> bool {
        self.kind == "A"
    }

    pub fn key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.timestamp,
            self.stop_id,
            self.vehicle_id,
            self.predicted_time,
            self.trip_id,
            self.distance_to_stop
        )
    }
}

// The feed is inconsistent about numeric encoding: some deployments send
// `lat`/`spd`/`pid` as JSON numbers, others as strings.

fn f64_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn u64_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => Ok(s),
        Raw::Number(n) => Ok(n.to_string()),
    }
}
