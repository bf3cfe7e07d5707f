use geo::{BoundingRect, Centroid, Coord, Geometry, MultiPolygon, Point, Rect};
use geojson::FeatureCollection;
use ratatui::layout::Rect as TuiRect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::Span;
use ratatui::widgets::canvas::{Canvas, Line, Map, MapResolution};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::{PerimeterProperties, properties};
use crate::incident::Marker;

/// Kolor obwodów (#e53e3e)
pub const PERIMETER_COLOR: Color = Color::Rgb(0xe5, 0x3e, 0x3e);
pub const MARKER_SYMBOL: &str = "▲";

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("feature has no geometry")]
    Missing,
    #[error("unsupported geometry type {0}")]
    Unsupported(&'static str),
    #[error("geometry has no centroid")]
    Empty,
    #[error("cannot convert geometry: {0}")]
    Conversion(String),
}

fn geometry_kind(geom: &Geometry<f64>) -> &'static str {
    match geom {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Buduje wielokąt (lub multi-wielokąt) z surowych współrzędnych [lon, lat]
/// i liczy jego centroid.
pub fn resolve_geometry(
    geometry: Option<geojson::Geometry>,
) -> Result<(MultiPolygon<f64>, Point<f64>), GeometryError> {
    let gj = geometry.ok_or(GeometryError::Missing)?;
    let geom: Geometry<f64> = gj
        .value
        .try_into()
        .map_err(|e: geojson::Error| GeometryError::Conversion(e.to_string()))?;
    match geom {
        Geometry::Polygon(p) => {
            let centroid = p.centroid().ok_or(GeometryError::Empty)?;
            Ok((p.into(), centroid))
        }
        Geometry::MultiPolygon(mp) => {
            let centroid = mp.centroid().ok_or(GeometryError::Empty)?;
            Ok((mp, centroid))
        }
        other => Err(GeometryError::Unsupported(geometry_kind(&other))),
    }
}

/// Obwód pożaru z policzonym raz centroidem
#[derive(Clone, Debug)]
pub struct Perimeter {
    pub properties: PerimeterProperties,
    pub shape: MultiPolygon<f64>,
    pub centroid: Point<f64>,
}

/// Warstwa obwodów gotowa do rysowania
#[derive(Clone, Debug, Default)]
pub struct PerimeterLayer {
    perimeters: Vec<Perimeter>,
    skipped: usize,
}

impl PerimeterLayer {
    pub fn from_collection(fc: FeatureCollection) -> Self {
        let mut layer = Self::default();
        for feature in fc.features {
            // Złe atrybuty nie usuwają obwodu z warstwy, tylko geometria o tym decyduje
            let props: PerimeterProperties = properties(&feature).unwrap_or_else(|e| {
                warn!(error = %e, "perimeter attributes unreadable, drawing without them");
                PerimeterProperties::default()
            });
            match resolve_geometry(feature.geometry) {
                Ok((shape, centroid)) => layer.perimeters.push(Perimeter { properties: props, shape, centroid }),
                Err(e) => {
                    warn!(incident = ?props.incident_name, error = %e, "skipping perimeter");
                    layer.skipped += 1;
                }
            }
        }
        debug!(perimeters = layer.perimeters.len(), skipped = layer.skipped, "perimeter layer built");
        layer
    }

    pub fn perimeters(&self) -> &[Perimeter] {
        &self.perimeters
    }

    pub fn len(&self) -> usize {
        self.perimeters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perimeters.is_empty()
    }

    /// Obiekty pominięte z powodu złej lub brakującej geometrii
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Zakres wszystkich obwodów
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.perimeters
            .iter()
            .filter_map(|p| p.shape.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }
}

/// Widok mapy: środek (lon, lat) i poziom przybliżenia
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub center: Coord<f64>,
    pub zoom: u8,
}

impl Viewport {
    pub const MIN_ZOOM: u8 = 2;
    pub const MAX_ZOOM: u8 = 14;
    /// Szerokość widoku w "kafelkach" mapy
    const TILES_ACROSS: f64 = 6.0;

    pub fn new(lat: f64, lon: f64, zoom: u8) -> Self {
        Self {
            center: Coord { x: lon.clamp(-180.0, 180.0), y: lat.clamp(-85.0, 85.0) },
            zoom: zoom.clamp(Self::MIN_ZOOM, Self::MAX_ZOOM),
        }
    }

    /// Rozpiętość w stopniach długości geograficznej
    pub fn lon_span(&self) -> f64 {
        360.0 * Self::TILES_ACROSS / f64::from(1u32 << self.zoom)
    }

    /// Granice osi płótna dla danego obszaru; komórka terminala jest ~2x wyższa niż szersza
    pub fn bounds(&self, area: TuiRect) -> ([f64; 2], [f64; 2]) {
        let lon_span = self.lon_span();
        let width = f64::from(area.width.max(1));
        let height = f64::from(area.height.max(1));
        let lat_span = lon_span * height * 2.0 / width;
        (
            [self.center.x - lon_span / 2.0, self.center.x + lon_span / 2.0],
            [self.center.y - lat_span / 2.0, self.center.y + lat_span / 2.0],
        )
    }

    /// Przesunięcie o ułamek szerokości widoku
    pub fn pan(&mut self, dx: f64, dy: f64) {
        let step = self.lon_span() / 10.0;
        self.center.x = (self.center.x + dx * step).clamp(-180.0, 180.0);
        self.center.y = (self.center.y + dy * step).clamp(-85.0, 85.0);
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom + 1).min(Self::MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = self.zoom.saturating_sub(1).max(Self::MIN_ZOOM);
    }

    pub fn center_on(&mut self, point: Point<f64>) {
        self.center = Coord { x: point.x(), y: point.y() };
    }

    /// Największe przybliżenie, przy którym cały prostokąt mieści się w widoku
    pub fn fit(&mut self, rect: Rect<f64>) {
        self.center = rect.center();
        let needed = rect.width().max(rect.height() * 2.0);
        let mut zoom = Self::MAX_ZOOM;
        while zoom > Self::MIN_ZOOM && Self::new(0.0, 0.0, zoom).lon_span() < needed {
            zoom -= 1;
        }
        self.zoom = zoom;
    }
}

/// Rysowanie mapy: podkład, obwody, znaczniki
pub struct MapView<'a> {
    pub viewport: &'a Viewport,
    pub overlay: Option<&'a PerimeterLayer>,
    pub markers: &'a [Marker],
    pub selected: Option<usize>,
}

impl MapView<'_> {
    pub fn render(&self, f: &mut Frame, area: TuiRect, title: &str) {
        let (x_bounds, y_bounds) = self.viewport.bounds(area);
        let canvas = Canvas::default()
            .block(Block::default().title(title.to_string()).borders(Borders::ALL))
            .marker(symbols::Marker::Braille)
            .x_bounds(x_bounds)
            .y_bounds(y_bounds)
            .paint(|ctx| {
                // 1) Podkład: linie brzegowe
                ctx.draw(&Map { color: Color::DarkGray, resolution: MapResolution::High });

                // 2) Obwody, wszystkie jednym kolorem
                if let Some(layer) = self.overlay {
                    ctx.layer();
                    for perimeter in layer.perimeters() {
                        for poly in &perimeter.shape.0 {
                            for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
                                for window in ring.0.windows(2) {
                                    let a = window[0];
                                    let b = window[1];
                                    ctx.draw(&Line { x1: a.x, y1: a.y, x2: b.x, y2: b.y, color: PERIMETER_COLOR });
                                }
                            }
                        }
                    }
                }

                // 3) Znaczniki, wybrany podświetlony
                if !self.markers.is_empty() {
                    ctx.layer();
                    for (i, marker) in self.markers.iter().enumerate() {
                        let style = if Some(i) == self.selected {
                            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                        } else {
                            Style::default().fg(Color::LightRed)
                        };
                        ctx.print(marker.lon(), marker.lat(), Span::styled(MARKER_SYMBOL, style));
                    }
                }
            });
        f.render_widget(canvas, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Contains;
    use serde_json::json;

    fn geometry(value: serde_json::Value) -> Option<geojson::Geometry> {
        Some(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn quadrilateral_centroid_lies_in_bounding_box() {
        let (shape, centroid) = resolve_geometry(geometry(json!({
            "type": "Polygon",
            "coordinates": [[[-121.0, 36.0], [-119.5, 36.2], [-119.0, 37.5], [-120.8, 37.1], [-121.0, 36.0]]]
        })))
        .unwrap();
        let bbox = shape.bounding_rect().unwrap();
        assert!(bbox.contains(&centroid));
        assert_eq!(shape.0.len(), 1);
    }

    #[test]
    fn square_centroid_is_its_centre() {
        let (_, c) = resolve_geometry(geometry(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]]
        })))
        .unwrap();
        assert!((c.x() - 1.0).abs() < 1e-9);
        assert!((c.y() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn multipolygon_keeps_all_parts() {
        let (shape, c) = resolve_geometry(geometry(json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
                [[[4.0, 0.0], [5.0, 0.0], [5.0, 1.0], [4.0, 1.0], [4.0, 0.0]]]
            ]
        })))
        .unwrap();
        assert_eq!(shape.0.len(), 2);
        assert!((c.x() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn other_geometry_types_are_rejected() {
        let err = resolve_geometry(geometry(json!({ "type": "Point", "coordinates": [1.0, 2.0] }))).unwrap_err();
        assert_eq!(err, GeometryError::Unsupported("Point"));
        assert_eq!(resolve_geometry(None).unwrap_err(), GeometryError::Missing);
    }

    #[test]
    fn layer_skips_bad_features() {
        let fc: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] },
                  "properties": { "IncidentName": "LINE" } },
                { "type": "Feature", "geometry": null, "properties": { "IncidentName": "NONE" } },
                { "type": "Feature",
                  "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]] },
                  "properties": { "IncidentName": "OK", "CreateDate": 1600000000000i64 } }
            ]
        }))
        .unwrap();
        let layer = PerimeterLayer::from_collection(fc);
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.skipped(), 2);
        assert_eq!(layer.perimeters()[0].properties.incident_name.as_deref(), Some("OK"));
    }

    #[test]
    fn mistyped_attributes_keep_the_shape() {
        let fc: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": { "CreateDate": 1.6e12, "IncidentName": "FLOAT DATE" },
                  "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]] } },
                { "type": "Feature", "properties": { "UnitID": 42, "IncidentName": "NUMERIC UNIT" },
                  "geometry": { "type": "Polygon", "coordinates": [[[2.0, 0.0], [3.0, 0.0], [2.0, 1.0], [2.0, 0.0]]] } }
            ]
        }))
        .unwrap();
        let layer = PerimeterLayer::from_collection(fc);
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.skipped(), 0);
        assert_eq!(layer.perimeters()[0].properties.create_date, Some(1_600_000_000_000));
        assert_eq!(layer.perimeters()[1].properties.unit_id.as_deref(), Some("42"));
        assert_eq!(layer.perimeters()[1].properties.incident_name.as_deref(), Some("NUMERIC UNIT"));
    }

    #[test]
    fn layer_bounds_cover_every_perimeter() {
        let fc: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon", "coordinates": [[[-121.0, 36.0], [-120.0, 36.0], [-120.0, 37.0], [-121.0, 36.0]]] } },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Polygon", "coordinates": [[[-117.0, 34.0], [-116.0, 34.0], [-116.0, 39.0], [-117.0, 34.0]]] } }
            ]
        }))
        .unwrap();
        let b = PerimeterLayer::from_collection(fc).bounds().unwrap();
        assert_eq!((b.min().x, b.min().y, b.max().x, b.max().y), (-121.0, 34.0, -116.0, 39.0));
        assert!(PerimeterLayer::default().bounds().is_none());
    }

    #[test]
    fn viewport_navigation() {
        let mut v = Viewport::new(36.714886, -120.221847, 7);
        let span = v.lon_span();
        v.zoom_in();
        assert_eq!(v.zoom, 8);
        assert!((v.lon_span() - span / 2.0).abs() < 1e-9);
        v.pan(1.0, 0.0);
        assert!(v.center.x > -120.221847);
        for _ in 0..20 {
            v.zoom_out();
        }
        assert_eq!(v.zoom, Viewport::MIN_ZOOM);
    }

    #[test]
    fn viewport_bounds_are_centred() {
        let v = Viewport::new(36.0, -120.0, 7);
        let (x, y) = v.bounds(TuiRect::new(0, 0, 80, 40));
        assert!(((x[0] + x[1]) / 2.0 + 120.0).abs() < 1e-9);
        assert!(((y[0] + y[1]) / 2.0 - 36.0).abs() < 1e-9);
        assert!((x[1] - x[0] - v.lon_span()).abs() < 1e-9);
    }

    #[test]
    fn fit_shows_the_whole_rect() {
        let mut v = Viewport::new(0.0, 0.0, 3);
        let rect = Rect::new(Coord { x: -124.0, y: 32.0 }, Coord { x: -114.0, y: 42.0 });
        v.fit(rect);
        assert_eq!(v.center, Coord { x: -119.0, y: 37.0 });
        assert!(v.lon_span() >= 20.0);
        assert!(Viewport::new(0.0, 0.0, v.zoom + 1).lon_span() < 20.0);
    }
}
