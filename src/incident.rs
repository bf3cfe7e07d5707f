use chrono::DateTime;
use geo::Point;
use geojson::FeatureCollection;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{
    data::{IncidentProperties, PerimeterProperties, properties},
    map_draw::PerimeterLayer,
};

const WRAPPERS: &[(char, char)] = &[('"', '"'), ('\'', '\''), ('{', '}')];

/// Klucz złączenia: zdejmuje białe znaki i wszystkie pary otaczających
/// znaków (`"…"`, `'…'`, `{…}`), potem zamienia na małe litery.
/// `None` gdy nic nie zostało.
pub fn normalize_irwin_id(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    loop {
        let mut chars = s.chars();
        let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
            break;
        };
        if !WRAPPERS.contains(&(first, last)) {
            break;
        }
        s = s[first.len_utf8()..s.len() - last.len_utf8()].trim();
    }
    if s.is_empty() { None } else { Some(s.to_lowercase()) }
}

/// Indeks metadanych incydentów po IrwinID
#[derive(Clone, Debug, Default)]
pub struct MetadataIndex {
    by_id: HashMap<String, IncidentProperties>,
    folded: HashMap<String, String>,
}

impl MetadataIndex {
    pub fn from_collection(fc: FeatureCollection) -> Self {
        let records = fc.features.iter().filter_map(|feature| {
            properties::<IncidentProperties>(feature)
                .inspect_err(|e| warn!(error = %e, "skipping incident with unreadable attributes"))
                .ok()
        });
        let index = Self::from_records(records);
        debug!(incidents = index.len(), "metadata index built");
        index
    }

    /// Jeden wpis na każdą wartość IrwinID; późniejszy rekord nadpisuje wcześniejszy
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = IncidentProperties>,
    {
        let mut index = Self::default();
        for record in records {
            let Some(id) = record.irwin_id.clone() else {
                continue;
            };
            if let Some(key) = normalize_irwin_id(&id) {
                index.folded.insert(key, id.clone());
            }
            index.by_id.insert(id, record);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Dokładnie po wartości pola IrwinID
    pub fn get(&self, irwin_id: &str) -> Option<&IncidentProperties> {
        self.by_id.get(irwin_id)
    }

    /// Po kluczu z [`normalize_irwin_id`]
    pub fn lookup(&self, key: &str) -> Option<&IncidentProperties> {
        self.folded.get(key).and_then(|id| self.get(id))
    }
}

pub fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%a %b %d %Y %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("unknown")
}

/// Blok "Additional Incident Information"
#[derive(Clone, Debug, PartialEq)]
pub struct IncidentDetails {
    pub last_updated: String,
    pub acres: String,
    pub percent_contained: String,
    pub personnel: String,
}

impl From<&IncidentProperties> for IncidentDetails {
    fn from(p: &IncidentProperties) -> Self {
        Self {
            last_updated: format_timestamp(p.modified_on),
            acres: format_number(p.daily_acres),
            percent_contained: format_number(p.percent_contained),
            personnel: format_number(p.total_personnel),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Popup {
    pub name: String,
    pub boundary_updated: String,
    pub unit_id: String,
    pub map_method: String,
    pub details: Option<IncidentDetails>,
}

impl Popup {
    pub fn new(perimeter: &PerimeterProperties, metadata: Option<&IncidentProperties>) -> Self {
        Self {
            name: or_unknown(&perimeter.incident_name).to_string(),
            boundary_updated: format_timestamp(perimeter.create_date),
            unit_id: or_unknown(&perimeter.unit_id).to_string(),
            map_method: or_unknown(&perimeter.map_method).to_string(),
            details: metadata.map(IncidentDetails::from),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Name: {}", self.name),
            format!("Boundary Updated: {}", self.boundary_updated),
            format!("Created by: {} via {}", self.unit_id, self.map_method),
        ];
        if let Some(d) = &self.details {
            lines.push(String::new());
            lines.push("Additional Incident Information".to_string());
            lines.push(format!("Last Updated: {}", d.last_updated));
            lines.push(format!("Acres: {}", d.acres));
            lines.push(format!("Percent Contained: {}", d.percent_contained));
            lines.push(format!("Personnel: {}", d.personnel));
        }
        lines
    }
}

/// Znacznik w centroidzie obwodu; `position` w kolejności (lon, lat)
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub perimeter: usize,
    pub key: Option<String>,
    pub position: Point<f64>,
    pub popup: Popup,
}

impl Marker {
    pub fn lat(&self) -> f64 {
        self.position.y()
    }

    pub fn lon(&self) -> f64 {
        self.position.x()
    }
}

/// Złączenie obwodów z metadanymi: jeden znacznik na obwód,
/// blok szczegółów tylko gdy klucz istnieje w indeksie.
pub fn build_markers(layer: &PerimeterLayer, index: &MetadataIndex) -> Vec<Marker> {
    layer
        .perimeters()
        .iter()
        .enumerate()
        .map(|(i, perimeter)| {
            let key = perimeter.properties.irwin_id.as_deref().and_then(normalize_irwin_id);
            let metadata = key.as_deref().and_then(|k| index.lookup(k));
            if metadata.is_none() {
                debug!(key = ?key, "no incident metadata for perimeter");
            }
            Marker {
                perimeter: i,
                position: perimeter.centroid,
                popup: Popup::new(&perimeter.properties, metadata),
                key,
            }
        })
        .collect()
}
