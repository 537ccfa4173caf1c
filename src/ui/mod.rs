use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use termion::event::Key;

use crate::audio::{AudioCommand, AudioEvent, RouteState, StreamEntry, StreamId};

/// Height of the status bar at the bottom
const STATUS_HEIGHT: u16 = 3;

/// Height of the route summary above the list
const ROUTE_HEIGHT: u16 = 3;

pub struct App {
    pub running: bool,
    streams: Vec<StreamEntry>,
    selected_row: usize,
    status_message: String,
    route_state: RouteState,
    route_stream: Option<StreamId>,
    /// Name of the virtual microphone once it is usable
    virtual_mic: Option<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            running: true,
            streams: Vec::new(),
            selected_row: 0,
            status_message: String::from("Creating virtual microphone..."),
            route_state: RouteState::Idle,
            route_stream: None,
            virtual_mic: None,
        }
    }

    pub fn selected_row(&self) -> usize {
        self.selected_row
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Handle a key press, returning the command for the audio engine, if any
    pub fn handle_input(&mut self, key: Key) -> Option<AudioCommand> {
        match key {
            Key::Char('q') | Key::Esc | Key::Ctrl('c') => {
                self.running = false;
                None
            }
            Key::Up | Key::Char('k') => {
                self.selected_row = self.selected_row.saturating_sub(1);
                None
            }
            Key::Down | Key::Char('j') => {
                if self.selected_row + 1 < self.streams.len() {
                    self.selected_row += 1;
                }
                None
            }
            Key::Char('r') => {
                self.status_message = String::from("Refreshed source list");
                Some(AudioCommand::Refresh)
            }
            Key::Char('\n') | Key::Char(' ') => self.activate_selected(),
            _ => None,
        }
    }

    fn activate_selected(&mut self) -> Option<AudioCommand> {
        let entry = self.streams.get(self.selected_row)?;

        if self.virtual_mic.is_none() {
            self.status_message = String::from("Virtual microphone not ready yet");
            return None;
        }
        if !entry.resolvable {
            self.status_message = format!("{} has no stereo output", entry.label);
            return None;
        }
        if entry.selected {
            return None;
        }

        self.status_message = format!("Routing {}", entry.label);
        Some(AudioCommand::Select {
            stream_id: entry.id,
        })
    }

    pub fn handle_audio_events(&mut self, events: &[AudioEvent]) {
        for event in events {
            match event {
                AudioEvent::VirtualMicReady { name } => {
                    self.virtual_mic = Some(name.clone());
                    self.status_message = format!("{} ready", name);
                }
                AudioEvent::StreamsChanged { streams } => {
                    let current = self.streams.get(self.selected_row).map(|e| e.id);
                    self.streams = streams.clone();
                    // Keep the cursor on the same stream when rows shift
                    self.selected_row = current
                        .and_then(|id| self.streams.iter().position(|e| e.id == id))
                        .unwrap_or(self.selected_row)
                        .min(self.streams.len().saturating_sub(1));
                }
                AudioEvent::RouteChanged { state, stream_id } => {
                    self.route_state = *state;
                    self.route_stream = *stream_id;
                }
                AudioEvent::Status { message } => {
                    self.status_message = message.clone();
                }
                AudioEvent::Error { message } => {
                    self.status_message = format!("Error: {}", message);
                }
            }
        }
    }

    fn route_label(&self) -> String {
        let label = self.route_stream.map(|id| {
            self.streams
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.label.clone())
                .unwrap_or_else(|| id.to_string())
        });

        match (self.route_state, label) {
            (RouteState::Idle, _) | (_, None) => String::from("No source"),
            (RouteState::Active, Some(label)) => label,
            (state, Some(label)) => format!("{} ({})", label, state),
        }
    }

    pub fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(ROUTE_HEIGHT),
                Constraint::Min(0),
                Constraint::Length(STATUS_HEIGHT),
            ])
            .split(frame.area());

        self.render_route(frame, chunks[0]);
        self.render_stream_list(frame, chunks[1]);
        self.render_status_bar(frame, chunks[2]);
    }

    fn render_route(&self, frame: &mut Frame, area: Rect) {
        let mic = self.virtual_mic.as_deref().unwrap_or("starting...");
        let line = Line::from(vec![
            Span::styled(
                mic,
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  <-  "),
            Span::styled(self.route_label(), Style::default().fg(Color::White)),
        ]);

        let paragraph = Paragraph::new(line)
            .block(Block::default().borders(Borders::ALL).title("virtmic"))
            .alignment(Alignment::Left);

        frame.render_widget(paragraph, area);
    }

    fn render_stream_list(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("Select Source")
            .title_alignment(Alignment::Left);

        if self.streams.is_empty() {
            let paragraph = Paragraph::new("No applications are playing audio")
                .block(block)
                .alignment(Alignment::Center);
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem> = self
            .streams
            .iter()
            .map(|entry| {
                let indicator = if entry.selected { "[x]" } else { "[ ]" };
                let label_style = if entry.resolvable {
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        indicator,
                        Style::default().fg(if entry.selected {
                            Color::Cyan
                        } else {
                            Color::DarkGray
                        }),
                    ),
                    Span::raw(" "),
                    Span::styled(entry.label.as_str(), label_style),
                ]))
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");

        frame.render_stateful_widget(
            list,
            area,
            &mut ListState::default().with_selected(Some(self.selected_row)),
        );
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let status_text = vec![Line::from(vec![
            Span::styled(
                "Status: ",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(&self.status_message, Style::default().fg(Color::White)),
            Span::raw("  |  "),
            Span::styled("q", Style::default().fg(Color::Cyan)),
            Span::raw(": quit  "),
            Span::styled("↑/↓", Style::default().fg(Color::Cyan)),
            Span::raw(": move  "),
            Span::styled("Enter", Style::default().fg(Color::Cyan)),
            Span::raw(": route  "),
            Span::styled("r", Style::default().fg(Color::Cyan)),
            Span::raw(": refresh"),
        ])];

        let paragraph = Paragraph::new(status_text)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Left);

        frame.render_widget(paragraph, area);
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
