use geojson::{Feature, FeatureCollection, GeoJson};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use std::{
    fs,
    path::PathBuf,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::FeatureSource, incident::MetadataIndex, map_draw::PerimeterLayer};

/// Atrybuty obwodu pożaru (warstwa Public_Wildfire_Perimeters_View).
/// Pole o nieoczekiwanym typie staje się `None`, reszta obiektu zostaje.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PerimeterProperties {
    #[serde(rename = "IncidentName", default, deserialize_with = "lenient_string")]
    pub incident_name: Option<String>,
    /// Milisekundy od epoki
    #[serde(rename = "CreateDate", default, deserialize_with = "lenient_millis")]
    pub create_date: Option<i64>,
    #[serde(rename = "UnitID", default, deserialize_with = "lenient_string")]
    pub unit_id: Option<String>,
    #[serde(rename = "MapMethod", default, deserialize_with = "lenient_string")]
    pub map_method: Option<String>,
    #[serde(rename = "GISAcres", default, deserialize_with = "lenient_f64")]
    pub gis_acres: Option<f64>,
    /// Zwykle opakowany w nawiasy klamrowe albo cudzysłów
    #[serde(rename = "IRWINID", default, deserialize_with = "lenient_string")]
    pub irwin_id: Option<String>,
}

/// Atrybuty incydentu (warstwa Active_Fires)
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IncidentProperties {
    #[serde(rename = "IrwinID", default, deserialize_with = "lenient_string")]
    pub irwin_id: Option<String>,
    #[serde(rename = "ModifiedOnDateTime", default, deserialize_with = "lenient_millis")]
    pub modified_on: Option<i64>,
    #[serde(rename = "DailyAcres", default, deserialize_with = "lenient_f64")]
    pub daily_acres: Option<f64>,
    #[serde(rename = "PercentContained", default, deserialize_with = "lenient_f64")]
    pub percent_contained: Option<f64>,
    #[serde(rename = "TotalIncidentPersonnel", default, deserialize_with = "lenient_f64")]
    pub total_personnel: Option<f64>,
}

// Serwisy ArcGIS potrafią zwrócić liczbę tam, gdzie schemat mówi o tekście (i odwrotnie)

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("feature service error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("expected a FeatureCollection, got {0}")]
    NotACollection(&'static str),
}

/// Wynik jednego ładowania; każdy wątek wysyła dokładnie jedno zdarzenie
#[derive(Debug)]
pub enum LoadEvent {
    Perimeters(Result<PerimeterLayer, LoadError>),
    Incidents(Result<MetadataIndex, LoadError>),
}

/// Typowane atrybuty obiektu; brak `properties` traktujemy jak pusty obiekt
pub fn properties<T: DeserializeOwned>(feature: &Feature) -> Result<T, serde_json::Error> {
    let props = feature.properties.clone().unwrap_or_default();
    serde_json::from_value(serde_json::Value::Object(props))
}

/// Zamienia odpowiedź serwisu na kolekcję, rozpoznając obiekt `error` ArcGIS
pub fn parse_collection(value: serde_json::Value) -> Result<FeatureCollection, LoadError> {
    if let Some(err) = value.get("error") {
        return Err(LoadError::Service {
            code: err.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
            message: err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    match GeoJson::from_json_value(value)? {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(_) => Err(LoadError::NotACollection("Feature")),
        GeoJson::Geometry(_) => Err(LoadError::NotACollection("Geometry")),
    }
}

pub fn build_client() -> Result<reqwest::blocking::Client, LoadError> {
    Ok(reqwest::blocking::Client::builder()
        .user_agent(concat!("fire-atlas/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()?)
}

pub fn load_collection(
    client: &reqwest::blocking::Client,
    source: &FeatureSource,
) -> Result<FeatureCollection, LoadError> {
    let value: serde_json::Value = match source {
        FeatureSource::Remote { endpoint, params } => {
            debug!(endpoint = %endpoint, "querying feature service");
            client
                .get(endpoint)
                .query(params)
                .send()?
                .error_for_status()?
                .json()?
        }
        FeatureSource::File(path) => {
            let bytes = fs::read(path).map_err(|source| LoadError::Io { path: path.clone(), source })?;
            serde_json::from_slice(&bytes)?
        }
    };
    parse_collection(value)
}

/// Uruchamia oba ładowania równolegle, każde w osobnym wątku.
/// Kolejność zdarzeń na kanale nie jest określona.
pub fn spawn_loaders(
    perimeters: FeatureSource,
    incidents: FeatureSource,
) -> Result<Receiver<LoadEvent>, LoadError> {
    let client = build_client()?;
    let (tx, rx) = mpsc::channel();

    spawn_one(tx.clone(), "perimeters", {
        let client = client.clone();
        move || {
            LoadEvent::Perimeters(load_collection(&client, &perimeters).map(PerimeterLayer::from_collection))
        }
    });
    spawn_one(tx, "incidents", move || {
        LoadEvent::Incidents(load_collection(&client, &incidents).map(MetadataIndex::from_collection))
    });

    Ok(rx)
}

fn spawn_one<F>(tx: Sender<LoadEvent>, name: &'static str, job: F)
where
    F: FnOnce() -> LoadEvent + Send + 'static,
{
    thread::spawn(move || {
        info!(dataset = name, "loading");
        let event = job();
        // Odbiorca mógł już zniknąć (wyjście z aplikacji) - wtedy po prostu kończymy
        if tx.send(event).is_err() {
            warn!(dataset = name, "view closed before load finished");
        }
    });
}
