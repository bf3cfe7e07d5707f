use crossterm::event::KeyCode;
use tracing::{error, info};

use crate::{
    data::LoadEvent,
    incident::{Marker, MetadataIndex, build_markers},
    map_draw::{PerimeterLayer, Viewport},
};

/// Stan jednego zbioru danych
#[derive(Debug)]
pub enum Slot<T> {
    Pending,
    Loaded(T),
    Failed(String),
}

impl<T> Slot<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            Slot::Loaded(v) => Some(v),
            _ => None,
        }
    }

    fn from_result<E: std::fmt::Display>(dataset: &str, result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Slot::Loaded(v),
            Err(e) => {
                error!(dataset, error = %e, "load failed");
                Slot::Failed(e.to_string())
            }
        }
    }
}

pub struct AppState {
    pub perimeters: Slot<PerimeterLayer>,
    pub incidents: Slot<MetadataIndex>,
    /// Wynik złączenia; liczony ponownie tylko po zmianie któregoś zbioru
    pub markers: Vec<Marker>,
    pub selected: usize,
    pub show_popup: bool,
    pub viewport: Viewport,
    home: Viewport,
}

impl AppState {
    pub const HELP_TEXT: &'static str = "\
↑/↓: select incident
Enter: toggle popup
h/j/k/l: pan   +/-: zoom
c: centre on incident
f: fit perimeters   0: reset view
q: quit";

    pub fn new(viewport: Viewport) -> Self {
        Self {
            perimeters: Slot::Pending,
            incidents: Slot::Pending,
            markers: Vec::new(),
            selected: 0,
            show_popup: true,
            viewport,
            home: viewport,
        }
    }

    /// Zakończone ładowanie wypełnia dokładnie jeden slot
    pub fn apply(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::Perimeters(result) => {
                if let Ok(layer) = &result {
                    info!(perimeters = layer.len(), skipped = layer.skipped(), "perimeters loaded");
                }
                self.perimeters = Slot::from_result("perimeters", result);
            }
            LoadEvent::Incidents(result) => {
                if let Ok(index) = &result {
                    info!(incidents = index.len(), "incident metadata loaded");
                }
                self.incidents = Slot::from_result("incidents", result);
            }
        }
        self.rebuild_markers();
    }

    fn rebuild_markers(&mut self) {
        self.markers = match (self.perimeters.loaded(), self.incidents.loaded()) {
            (Some(layer), Some(index)) => build_markers(layer, index),
            _ => Vec::new(),
        };
        let joined = self.markers.iter().filter(|m| m.popup.details.is_some()).count();
        if !self.markers.is_empty() {
            info!(markers = self.markers.len(), joined, "markers ready");
        }
        self.selected = self.selected.min(self.markers.len().saturating_sub(1));
    }

    /// Warstwa obwodów, gdy jest już załadowana
    pub fn overlay(&self) -> Option<&PerimeterLayer> {
        self.perimeters.loaded()
    }

    pub fn selected_marker(&self) -> Option<&Marker> {
        self.markers.get(self.selected)
    }

    /// Zwraca true, jeśli trzeba wyjść
    pub fn handle_input(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        match key {
            Char('q') => return true,
            Up => if self.selected > 0 { self.selected -= 1 },
            Down => if self.selected + 1 < self.markers.len() { self.selected += 1 },
            Enter => self.show_popup = !self.show_popup,
            Char('h') | Left => self.viewport.pan(-1.0, 0.0),
            Char('l') | Right => self.viewport.pan(1.0, 0.0),
            Char('k') => self.viewport.pan(0.0, 1.0),
            Char('j') => self.viewport.pan(0.0, -1.0),
            Char('+') | Char('=') => self.viewport.zoom_in(),
            Char('-') => self.viewport.zoom_out(),
            Char('c') => {
                if let Some(marker) = self.markers.get(self.selected) {
                    self.viewport.center_on(marker.position);
                }
            }
            Char('f') => {
                if let Some(bounds) = self.overlay().and_then(PerimeterLayer::bounds) {
                    self.viewport.fit(bounds);
                }
            }
            Char('0') => self.viewport = self.home,
            _ => {}
        }
        false
    }

    /// Krótki opis stanu ładowania do paska statusu
    pub fn status(&self) -> String {
        let perimeters = match &self.perimeters {
            Slot::Pending => "loading…".to_string(),
            Slot::Loaded(layer) => layer.len().to_string(),
            Slot::Failed(e) => format!("failed ({e})"),
        };
        let incidents = match &self.incidents {
            Slot::Pending => "loading…".to_string(),
            Slot::Loaded(index) => index.len().to_string(),
            Slot::Failed(e) => format!("failed ({e})"),
        };
        format!("perimeters: {perimeters} | incidents: {incidents}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{IncidentProperties, LoadError};
    use serde_json::json;

    fn layer() -> PerimeterLayer {
        PerimeterLayer::from_collection(
            serde_json::from_value(json!({
                "type": "FeatureCollection",
                "features": [
                    { "type": "Feature",
                      "geometry": { "type": "Polygon", "coordinates": [[[-120.0, 37.0], [-119.0, 37.0], [-119.0, 38.0], [-120.0, 38.0], [-120.0, 37.0]]] },
                      "properties": { "IRWINID": "{ABC}", "IncidentName": "ONE" } },
                    { "type": "Feature",
                      "geometry": { "type": "Polygon", "coordinates": [[[-118.0, 35.0], [-117.0, 35.0], [-117.0, 36.0], [-118.0, 36.0], [-118.0, 35.0]]] },
                      "properties": { "IRWINID": "{DEF}", "IncidentName": "TWO" } }
                ]
            }))
            .unwrap(),
        )
    }

    fn index() -> MetadataIndex {
        MetadataIndex::from_records([IncidentProperties { irwin_id: Some("abc".into()), ..Default::default() }])
    }

    fn state() -> AppState {
        AppState::new(Viewport::new(36.714886, -120.221847, 7))
    }

    #[test]
    fn markers_wait_for_both_slots() {
        let mut s = state();
        s.apply(LoadEvent::Perimeters(Ok(layer())));
        assert!(s.overlay().is_some());
        assert!(s.markers.is_empty());

        s.apply(LoadEvent::Incidents(Ok(index())));
        assert_eq!(s.markers.len(), 2);
        assert!(s.markers[0].popup.details.is_some());
        assert!(s.markers[1].popup.details.is_none());
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let mut s = state();
        s.apply(LoadEvent::Incidents(Ok(index())));
        assert!(s.overlay().is_none());
        assert!(s.markers.is_empty());
        s.apply(LoadEvent::Perimeters(Ok(layer())));
        assert_eq!(s.markers.len(), 2);
    }

    #[test]
    fn failed_load_leaves_map_partial() {
        let mut s = state();
        s.apply(LoadEvent::Perimeters(Ok(layer())));
        s.apply(LoadEvent::Incidents(Err(LoadError::NotACollection("Geometry"))));
        assert!(matches!(s.incidents, Slot::Failed(_)));
        assert!(s.overlay().is_some());
        assert!(s.markers.is_empty());
        assert!(s.status().contains("incidents: failed"));
        assert!(s.status().contains("perimeters: 2"));
    }

    #[test]
    fn selection_stays_in_range() {
        let mut s = state();
        s.apply(LoadEvent::Perimeters(Ok(layer())));
        s.apply(LoadEvent::Incidents(Ok(index())));
        assert!(!s.handle_input(KeyCode::Up));
        assert_eq!(s.selected, 0);
        s.handle_input(KeyCode::Down);
        s.handle_input(KeyCode::Down);
        assert_eq!(s.selected, 1);
        assert_eq!(s.selected_marker().map(|m| m.popup.name.as_str()), Some("TWO"));
    }

    #[test]
    fn view_keys() {
        let mut s = state();
        let home = s.viewport;
        s.apply(LoadEvent::Perimeters(Ok(layer())));
        s.apply(LoadEvent::Incidents(Ok(index())));

        s.handle_input(KeyCode::Char('c'));
        assert!((s.viewport.center.x + 119.5).abs() < 1e-9);
        assert!((s.viewport.center.y - 37.5).abs() < 1e-9);

        s.handle_input(KeyCode::Char('f'));
        assert!((s.viewport.center.x + 118.5).abs() < 1e-9);

        s.handle_input(KeyCode::Char('0'));
        assert_eq!(s.viewport, home);

        assert!(s.show_popup);
        s.handle_input(KeyCode::Enter);
        assert!(!s.show_popup);
        assert!(s.handle_input(KeyCode::Char('q')));
    }
}
