//! Rendering for the two screens: device picker and running patch.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Frame,
};

use patchvm::audio::DeviceChoice;

pub fn render_device_picker(frame: &mut Frame, devices: &[DeviceChoice], selected: usize) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(area);

    let title = Paragraph::new("patchvm - select an output device")
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(title, chunks[0]);

    let items: Vec<ListItem> = devices
        .iter()
        .map(|d| ListItem::new(format!("{} ({} Hz)", d.name, d.sample_rate)))
        .collect();
    let list = List::new(items)
        .block(Block::default().title(" Devices ").borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default();
    state.select(Some(selected));
    frame.render_stateful_widget(list, chunks[1], &mut state);

    let help = Paragraph::new("up/down select · enter start · q quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[2]);
}

pub fn render_running(
    frame: &mut Frame,
    device_name: &str,
    sample_rate: f32,
    listing: &str,
    peak: f32,
    log_lines: &[String],
) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // transport bar
            Constraint::Min(6),    // program + log
            Constraint::Length(3), // level meter
            Constraint::Length(1), // help bar
        ])
        .split(area);

    let transport = Paragraph::new(format!("playing on {device_name} @ {sample_rate} Hz"))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(transport, chunks[0]);

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);

    render_program(frame, panes[0], listing);
    render_log(frame, panes[1], log_lines);
    render_meter(frame, chunks[2], peak);

    let help = Paragraph::new("q quit").style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[3]);
}

fn render_program(frame: &mut Frame, area: Rect, listing: &str) {
    let lines: Vec<Line> = listing.lines().map(Line::from).collect();
    let program = Paragraph::new(lines)
        .block(Block::default().title(" Program ").borders(Borders::ALL));
    frame.render_widget(program, area);
}

fn render_log(frame: &mut Frame, area: Rect, log_lines: &[String]) {
    // Show the tail that fits inside the pane.
    let visible = area.height.saturating_sub(2) as usize;
    let start = log_lines.len().saturating_sub(visible);
    let lines: Vec<Line> = log_lines[start..]
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    let log = Paragraph::new(lines).block(Block::default().title(" Log ").borders(Borders::ALL));
    frame.render_widget(log, area);
}

fn render_meter(frame: &mut Frame, area: Rect, peak: f32) {
    let ratio = peak.clamp(0.0, 1.0) as f64;
    let meter = Gauge::default()
        .block(Block::default().title(" Level ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(if peak > 0.9 { Color::Red } else { Color::Green }))
        .ratio(ratio)
        .label(format!("peak {peak:.3}"));
    frame.render_widget(meter, area);
}
