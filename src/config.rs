use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use std::path::PathBuf;

/// Format znacznika czasu w klauzuli `TIMESTAMP '...'`
pub const WHERE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const INCIDENTS_ENDPOINT: &str =
    "https://services3.arcgis.com/T4QMspbfLg3qTGWY/arcgis/rest/services/Active_Fires/FeatureServer/0/query";
pub const PERIMETERS_ENDPOINT: &str =
    "https://services3.arcgis.com/T4QMspbfLg3qTGWY/arcgis/rest/services/Public_Wildfire_Perimeters_View/FeatureServer/0/query";

/// Pola zamawiane z warstwy incydentów (outFields)
pub const INCIDENT_FIELDS: &[&str] = &[
    "OBJECTID",
    "CalculatedAcres",
    "ContainmentDateTime",
    "ControlDateTime",
    "CreatedOnDateTime",
    "DailyAcres",
    "DiscoveryAcres",
    "FinalFireReportApprovedByTitle",
    "FinalFireReportApprovedByUnit",
    "FinalFireReportApprovedDate",
    "FireBehaviorGeneral",
    "FireBehaviorGeneral1",
    "FireBehaviorGeneral2",
    "FireBehaviorGeneral3",
    "FireCause",
    "FireCauseGeneral",
    "FireCauseSpecific",
    "FireCode",
    "FireDiscoveryDateTime",
    "FireMgmtComplexity",
    "FireOutDateTime",
    "FSJobCode",
    "FSOverrideCode",
    "GACC",
    "IncidentManagementOrganization",
    "IncidentName",
    "IncidentShortDescription",
    "IncidentTypeCategory",
    "IncidentTypeKind",
    "InitialLatitude",
    "InitialLongitude",
    "InitialResponseAcres",
    "InitialResponseDateTime",
    "IrwinID",
    "IsFireCauseInvestigated",
    "IsValid",
    "LocalIncidentIdentifier",
    "ModifiedOnDateTime",
    "PercentContained",
    "TotalIncidentPersonnel",
    "UniqueFireIdentifier",
    "ModifiedBySystem",
    "CreatedOn",
    "ModifiedOn",
];

/// Zasięg zapytań w WGS84 (wkid 4326)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    /// Kalifornia
    pub const CALIFORNIA: BoundingBox = BoundingBox {
        xmin: -124.409591,
        ymin: 32.534156,
        xmax: -114.131211,
        ymax: 49.002494,
    };

    /// Parametr `geometry` w formacie envelope ArcGIS
    pub fn to_envelope_json(&self) -> String {
        serde_json::json!({
            "spatialReference": { "wkid": 4326 },
            "xmin": self.xmin,
            "ymin": self.ymin,
            "xmax": self.xmax,
            "ymax": self.ymax,
        })
        .to_string()
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = String;

    /// `xmin,ymin,xmax,ymax`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        let [xmin, ymin, xmax, ymax] = parts[..] else {
            return Err(format!("expected 4 comma separated numbers, got {}", parts.len()));
        };
        if xmin >= xmax || ymin >= ymax {
            return Err("min must be lower than max".to_string());
        }
        Ok(Self { xmin, ymin, xmax, ymax })
    }
}

/// Skąd bierzemy kolekcję: zapytanie do serwisu albo plik GeoJSON na dysku
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureSource {
    Remote { endpoint: String, params: Vec<(String, String)> },
    File(PathBuf),
}

impl FeatureSource {
    pub fn describe(&self) -> String {
        match self {
            FeatureSource::Remote { endpoint, .. } => endpoint.clone(),
            FeatureSource::File(path) => path.display().to_string(),
        }
    }
}

/// Sama data oznacza północ
fn parse_created_since(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, WHERE_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default()))
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM:SS\": {e}"))
}

#[derive(Parser, Debug, Clone)]
#[command(name = "fire-atlas", version, about = "Active wildfire perimeters on a terminal map")]
pub struct Args {
    /// Feature service queried for incident metadata
    #[arg(long, default_value = INCIDENTS_ENDPOINT)]
    pub incidents_endpoint: String,

    /// Feature service queried for fire perimeters
    #[arg(long, default_value = PERIMETERS_ENDPOINT)]
    pub perimeters_endpoint: String,

    /// Read incident metadata from a local GeoJSON file instead of the network
    #[arg(long, value_name = "PATH")]
    pub incidents_file: Option<PathBuf>,

    /// Read fire perimeters from a local GeoJSON file instead of the network
    #[arg(long, value_name = "PATH")]
    pub perimeters_file: Option<PathBuf>,

    /// Query extent as xmin,ymin,xmax,ymax
    #[arg(long, default_value = "-124.409591,32.534156,-114.131211,49.002494", allow_hyphen_values = true)]
    pub bbox: BoundingBox,

    #[arg(long, default_value_t = 100.0)]
    pub min_acres: f64,

    #[arg(long, default_value_t = 503778.0)]
    pub max_acres: f64,

    /// Lower bound on perimeter creation date ("YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD")
    #[arg(long, default_value = "2020-09-10 00:00:00", value_parser = parse_created_since)]
    pub created_since: NaiveDateTime,

    /// Initial map centre latitude
    #[arg(long, default_value_t = 36.714886, allow_hyphen_values = true)]
    pub lat: f64,

    /// Initial map centre longitude
    #[arg(long, default_value_t = -120.221847, allow_hyphen_values = true)]
    pub lon: f64,

    #[arg(long, default_value_t = 7)]
    pub zoom: u8,

    /// Print joined incidents to stdout and exit
    #[arg(long)]
    pub list: bool,

    #[arg(long, default_value = "fire-atlas.log")]
    pub log_file: PathBuf,
}

impl Args {
    /// Warunek `where` dla warstwy obwodów
    pub fn perimeter_where(&self) -> String {
        format!(
            "GISAcres >= {} AND GISAcres <= {} AND CreateDate >= TIMESTAMP '{}'",
            self.min_acres,
            self.max_acres,
            self.created_since.format(WHERE_TIMESTAMP_FORMAT)
        )
    }

    pub fn incidents_source(&self) -> FeatureSource {
        if let Some(path) = &self.incidents_file {
            return FeatureSource::File(path.clone());
        }
        FeatureSource::Remote {
            endpoint: self.incidents_endpoint.clone(),
            params: vec![
                ("geometry".to_string(), self.bbox.to_envelope_json()),
                ("where".to_string(), "1=1".to_string()),
                ("outFields".to_string(), INCIDENT_FIELDS.join(",")),
                ("f".to_string(), "geojson".to_string()),
            ],
        }
    }

    pub fn perimeters_source(&self) -> FeatureSource {
        if let Some(path) = &self.perimeters_file {
            return FeatureSource::File(path.clone());
        }
        FeatureSource::Remote {
            endpoint: self.perimeters_endpoint.clone(),
            params: vec![
                ("f".to_string(), "geojson".to_string()),
                ("geometry".to_string(), self.bbox.to_envelope_json()),
                ("where".to_string(), self.perimeter_where()),
                ("outFields".to_string(), "*".to_string()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["fire-atlas"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_match_the_fixed_queries() {
        let a = args(&[]);
        assert_eq!(a.bbox, BoundingBox::CALIFORNIA);
        assert_eq!(a.zoom, 7);
        assert_eq!(a.lat, 36.714886);
        assert_eq!(a.lon, -120.221847);
        assert_eq!(
            a.perimeter_where(),
            "GISAcres >= 100 AND GISAcres <= 503778 AND CreateDate >= TIMESTAMP '2020-09-10 00:00:00'"
        );
    }

    #[test]
    fn incident_query_has_no_attribute_filter() {
        let FeatureSource::Remote { endpoint, params } = args(&[]).incidents_source() else {
            panic!("expected remote source");
        };
        assert_eq!(endpoint, INCIDENTS_ENDPOINT);
        let get = |k: &str| params.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("where"), Some("1=1"));
        assert_eq!(get("f"), Some("geojson"));
        assert!(get("outFields").is_some_and(|f| f.contains("IrwinID") && f.contains("PercentContained")));
    }

    #[test]
    fn perimeter_query_asks_for_all_fields() {
        let FeatureSource::Remote { params, .. } = args(&["--min-acres", "250"]).perimeters_source() else {
            panic!("expected remote source");
        };
        assert!(params.contains(&("outFields".to_string(), "*".to_string())));
        assert!(params.iter().any(|(k, v)| k == "where" && v.starts_with("GISAcres >= 250 AND")));
    }

    #[test]
    fn file_flag_overrides_endpoint() {
        let a = args(&["--perimeters-file", "perims.geojson"]);
        assert_eq!(a.perimeters_source(), FeatureSource::File(PathBuf::from("perims.geojson")));
        assert!(matches!(a.incidents_source(), FeatureSource::Remote { .. }));
    }

    #[test]
    fn created_since_is_validated() {
        let a = args(&["--created-since", "2023-06-01"]);
        assert!(a.perimeter_where().ends_with("CreateDate >= TIMESTAMP '2023-06-01 00:00:00'"));

        let a = args(&["--created-since", "2021-01-02 03:04:05"]);
        assert!(a.perimeter_where().ends_with("TIMESTAMP '2021-01-02 03:04:05'"));

        for bad in ["2020-13-40 00:00:00", "2020-09-10' OR '1'='1", "yesterday"] {
            assert!(Args::try_parse_from(["fire-atlas", "--created-since", bad]).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn bbox_parsing() {
        let b: BoundingBox = "-10, 20, 5.5, 30".parse().unwrap();
        assert_eq!(b, BoundingBox { xmin: -10.0, ymin: 20.0, xmax: 5.5, ymax: 30.0 });
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("5,2,1,3".parse::<BoundingBox>().is_err());
        assert!("a,2,3,4".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn envelope_json_carries_wgs84() {
        let v: serde_json::Value = serde_json::from_str(&BoundingBox::CALIFORNIA.to_envelope_json()).unwrap();
        assert_eq!(v["spatialReference"]["wkid"], 4326);
        assert_eq!(v["xmin"], -124.409591);
    }
}
