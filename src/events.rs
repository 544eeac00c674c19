use crossterm::event::Event;

use crate::browser::Message;

#[derive(Debug)]
pub enum AppEvent {
    Input(Event),
    /// Completion of a listing or transfer, fed back into the browser.
    Browser(Message),
}
