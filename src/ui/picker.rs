//! Server picker shown when several configured servers match.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerFlow {
    Continue,
    Chosen(usize),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ServerPicker {
    title: String,
    labels: Vec<String>,
    selected: usize,
}

impl ServerPicker {
    pub fn new(title: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            title: title.into(),
            labels,
            selected: 0,
        }
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> PickerFlow {
        if key.kind != KeyEventKind::Press {
            return PickerFlow::Continue;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return PickerFlow::Cancelled;
        }

        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                PickerFlow::Continue
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.labels.len() {
                    self.selected += 1;
                }
                PickerFlow::Continue
            }
            KeyCode::Enter if !self.labels.is_empty() => PickerFlow::Chosen(self.selected),
            KeyCode::Esc | KeyCode::Char('q') => PickerFlow::Cancelled,
            _ => PickerFlow::Continue,
        }
    }
}

pub fn draw_picker(frame: &mut Frame, area: Rect, picker: &ServerPicker) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    let items: Vec<ListItem> = picker
        .labels
        .iter()
        .map(|label| ListItem::new(Line::from(label.as_str())))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} ({} servers)", picker.title, picker.labels.len())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    frame.render_stateful_widget(
        list,
        layout[0],
        &mut ListState::default().with_selected(Some(picker.selected)),
    );

    let footer = Paragraph::new(Line::from(Span::styled(
        "Enter: Select   Esc/q: Cancel   k/↑: Up   j/↓: Down",
        Style::default().fg(Color::DarkGray),
    )))
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, layout[1]);
}
