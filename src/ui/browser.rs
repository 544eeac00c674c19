//! Remote browser view.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use crate::browser::{Browser, HELP_TEXT, NavigationState};

const HEADER_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 4;
/// Top and bottom border of the listing block.
const LIST_BORDER: u16 = 2;

/// Rows available for entries in a terminal of `terminal_height` rows.
pub fn list_height(terminal_height: u16) -> usize {
    terminal_height
        .saturating_sub(HEADER_HEIGHT + FOOTER_HEIGHT + LIST_BORDER)
        .max(1) as usize
}

/// The visible slice of the listing, one line per entry.
pub fn entry_lines(nav: &NavigationState) -> Vec<Line<'static>> {
    if nav.entries.is_empty() {
        return vec![Line::from(Span::styled(
            "(empty directory)",
            Style::default().fg(Color::DarkGray),
        ))];
    }

    nav.visible_range()
        .map(|idx| {
            let entry = &nav.entries[idx];
            let is_cursor = idx == nav.cursor;
            let marker = if is_cursor { "> " } else { "  " };
            let check = if nav.selected.contains(&idx) { "[x] " } else { "[ ] " };
            let kind = if entry.is_dir { "[DIR] " } else { "" };

            let mut style = if entry.is_dir {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            if is_cursor {
                style = style.add_modifier(Modifier::REVERSED);
            }

            Line::from(vec![
                Span::raw(marker),
                Span::styled(check, Style::default().fg(Color::Yellow)),
                Span::styled(format!("{kind}{}", entry.name), style),
            ])
        })
        .collect()
}

/// Everything the browser shows, top to bottom, as plain lines.
pub fn render_lines(nav: &NavigationState, status: &str, help: &str) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(format!("Remote: {}", nav.current_dir()))];
    lines.extend(entry_lines(nav));
    lines.push(Line::default());
    lines.push(Line::from(status.to_string()));
    lines.push(Line::from(help.to_string()));
    lines
}

pub fn draw_browser(f: &mut Frame, area: Rect, target: &str, browser: &Browser) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(1),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(area);

    let nav = &browser.nav;
    let hidden = if nav.show_hidden { " (hidden shown)" } else { "" };
    let header = Paragraph::new(Line::from(vec![
        Span::styled("Remote: ", Style::default().fg(Color::Gray)),
        Span::styled(
            nav.current_dir().to_string(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(hidden),
    ]))
    .block(Block::default().borders(Borders::ALL).title(format!(" {target} ")));
    f.render_widget(header, layout[0]);

    let title = if nav.selected.is_empty() {
        format!(" {} entries ", nav.entries.len())
    } else {
        format!(" {} entries, {} selected ", nav.entries.len(), nav.selected.len())
    };
    let listing = Paragraph::new(entry_lines(nav))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(listing, layout[1]);

    let status_style = if browser.is_downloading() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Green)
    };
    let footer = Paragraph::new(vec![
        Line::from(Span::styled(browser.status.clone(), status_style)),
        Line::from(Span::styled(HELP_TEXT, Style::default().fg(Color::DarkGray))),
    ])
    .block(Block::default().borders(Borders::TOP));
    f.render_widget(footer, layout[2]);
}
