use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use crate::map_draw::{MapView, PerimeterLayer};
use crate::state::AppState;

pub const ATTRIBUTION: &str = "Basemap: Natural Earth | Fire data: NIFC / ArcGIS Open Data";

pub fn draw(f: &mut Frame, state: &AppState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(f.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(rows[0]);

    // Lewy panel: lista incydentów
    let perimeters = state.overlay().map(PerimeterLayer::perimeters).unwrap_or_default();
    let items: Vec<ListItem> = state.markers
        .iter()
        .map(|m| {
            let acres = perimeters.get(m.perimeter).and_then(|p| p.properties.gis_acres);
            match acres {
                Some(a) => ListItem::new(format!("{} ({a:.0} ac)", m.popup.name)),
                None => ListItem::new(m.popup.name.clone()),
            }
        })
        .collect();
    let mut list_state = ListState::default();
    if !state.markers.is_empty() {
        list_state.select(Some(state.selected));
    }
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!("Incidents ({})", state.markers.len())))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, chunks[0], &mut list_state);

    // Środek: mapa, zawsze z podkładem
    let view = MapView {
        viewport: &state.viewport,
        overlay: state.overlay(),
        markers: &state.markers,
        selected: state.selected_marker().map(|_| state.selected),
    };
    let title = format!(
        "Wildfires | {:.3}, {:.3} | zoom {}",
        state.viewport.center.y, state.viewport.center.x, state.viewport.zoom
    );
    view.render(f, chunks[1], &title);

    // Prawy panel: popup wybranego incydentu albo pomoc
    let (title, text) = match state.selected_marker() {
        Some(marker) if state.show_popup => ("Incident", marker.popup.lines().join("\n")),
        _ => ("Help", AppState::HELP_TEXT.to_string()),
    };
    let popup = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: true });
    f.render_widget(popup, chunks[2]);

    // Pasek statusu z atrybucją
    let status = Paragraph::new(format!("{} | {}", state.status(), ATTRIBUTION))
        .style(Style::default().fg(Color::Gray));
    f.render_widget(status, rows[1]);
}
