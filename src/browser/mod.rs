//! The remote browser as a pure state machine.
//!
//! [`Browser::update`] folds one [`Message`] into the state and may hand
//! back a [`Command`] for the runtime to execute. Completed commands come
//! back as ordinary messages, so nothing here touches the network.

mod state;

pub use state::NavigationState;

use crate::error::AppError;
use crate::remote::RemoteEntry;
use crate::transfer::TransferOutcome;
use crate::utils::join_remote_path;

pub const HELP_TEXT: &str =
    "↑/k ↓/j move  space select  enter open  ←/⌫ back  . hidden  r refresh  d download  q quit";

/// What a key press asks the browser to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    ToggleSelect,
    Enter,
    Back,
    ToggleHidden,
    Refresh,
    Download,
    Quit,
}

/// Why a listing was requested; decides how a successful result is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListIntent {
    Initial,
    Enter,
    Back,
    ToggleHidden,
    Refresh,
}

#[derive(Debug)]
pub enum Message {
    Key(Action),
    Resize { height: usize },
    Listed {
        request: u64,
        result: Result<Vec<RemoteEntry>, AppError>,
    },
    TransferDone(TransferOutcome),
}

/// One directory listing the browser is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub request: u64,
    pub path: String,
    pub show_hidden: bool,
}

/// Side effects the runtime performs on the browser's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List(ListRequest),
    /// Download `entries` one after another, in order.
    Download { entries: Vec<RemoteEntry> },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Browsing,
    Downloading {
        /// Names of the batch, in transfer order.
        names: Vec<String>,
        done: usize,
        succeeded: usize,
        /// `(name, reason)` per failed entry.
        failures: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone)]
struct PendingListing {
    request: u64,
    intent: ListIntent,
    path: String,
    show_hidden: bool,
}

pub struct Browser {
    pub nav: NavigationState,
    pub mode: Mode,
    pub status: String,
    pending: Option<PendingListing>,
    next_request: u64,
}

impl Browser {
    pub fn new(start_dir: impl Into<String>, show_hidden: bool) -> Self {
        Self {
            nav: NavigationState::new(start_dir, show_hidden),
            mode: Mode::Browsing,
            status: String::new(),
            pending: None,
            next_request: 1,
        }
    }

    /// The listing to fetch before the first render.
    pub fn initial_listing(&mut self) -> ListRequest {
        let path = self.nav.current_dir().to_string();
        let show_hidden = self.nav.show_hidden;
        self.request_listing(ListIntent::Initial, path, show_hidden)
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self.mode, Mode::Downloading { .. })
    }

    pub fn is_listing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn update(&mut self, message: Message) -> Option<Command> {
        match message {
            Message::Key(action) => self.handle_action(action),
            Message::Resize { height } => {
                self.nav.set_viewport_height(height);
                None
            }
            Message::Listed { request, result } => {
                self.apply_listing(request, result);
                None
            }
            Message::TransferDone(outcome) => {
                self.apply_outcome(outcome);
                None
            }
        }
    }

    fn handle_action(&mut self, action: Action) -> Option<Command> {
        match action {
            Action::Quit => return Some(Command::Quit),
            Action::Up => self.nav.move_cursor(-1),
            Action::Down => self.nav.move_cursor(1),
            Action::PageUp => self.nav.page(-1),
            Action::PageDown => self.nav.page(1),
            Action::Home => self.nav.move_to_start(),
            Action::End => self.nav.move_to_end(),
            _ if self.is_downloading() => {}
            Action::ToggleSelect => self.nav.toggle_selected(),
            Action::Enter => return self.enter(),
            Action::Download => return self.start_download(),
            // Everything left re-lists; one listing at a time
            _ if self.is_listing() => {}
            Action::Back => {
                let parent = self.nav.parent_dir()?.to_string();
                let show_hidden = self.nav.show_hidden;
                return Some(Command::List(self.request_listing(
                    ListIntent::Back,
                    parent,
                    show_hidden,
                )));
            }
            Action::ToggleHidden => {
                let path = self.nav.current_dir().to_string();
                let show_hidden = !self.nav.show_hidden;
                return Some(Command::List(self.request_listing(
                    ListIntent::ToggleHidden,
                    path,
                    show_hidden,
                )));
            }
            Action::Refresh => {
                let path = self.nav.current_dir().to_string();
                let show_hidden = self.nav.show_hidden;
                return Some(Command::List(self.request_listing(
                    ListIntent::Refresh,
                    path,
                    show_hidden,
                )));
            }
        }
        None
    }

    /// Open the directory under the cursor; on a file, toggle its selection.
    fn enter(&mut self) -> Option<Command> {
        let entry = self.nav.current_entry()?;
        if !entry.is_dir {
            self.nav.toggle_selected();
            return None;
        }
        if self.is_listing() {
            return None;
        }
        let path = join_remote_path(self.nav.current_dir(), &entry.name);
        let show_hidden = self.nav.show_hidden;
        Some(Command::List(self.request_listing(
            ListIntent::Enter,
            path,
            show_hidden,
        )))
    }

    fn request_listing(&mut self, intent: ListIntent, path: String, show_hidden: bool) -> ListRequest {
        let request = self.next_request;
        self.next_request += 1;
        self.status = format!("Listing {}...", path);
        self.pending = Some(PendingListing {
            request,
            intent,
            path: path.clone(),
            show_hidden,
        });
        ListRequest {
            request,
            path,
            show_hidden,
        }
    }

    fn apply_listing(&mut self, request: u64, result: Result<Vec<RemoteEntry>, AppError>) {
        let Some(pending) = self.pending.take_if(|p| p.request == request) else {
            // Superseded or unknown response
            return;
        };

        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                self.status = e.to_string();
                return;
            }
        };

        match pending.intent {
            ListIntent::Initial | ListIntent::Refresh => {}
            ListIntent::Enter => self.nav.push_dir(pending.path),
            ListIntent::Back => {
                self.nav.pop_dir();
            }
            ListIntent::ToggleHidden => self.nav.show_hidden = pending.show_hidden,
        }
        self.status = format!("{} entries", entries.len());
        self.nav.replace_entries(entries);
    }

    fn start_download(&mut self) -> Option<Command> {
        if self.is_downloading() || self.is_listing() {
            return None;
        }
        if self.nav.selected.is_empty() {
            self.status = "Nothing selected".to_string();
            return None;
        }

        let entries = self.nav.selected_entries();
        let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        self.status = format!("Downloading 1/{}: {}", names.len(), names[0]);
        self.mode = Mode::Downloading {
            names,
            done: 0,
            succeeded: 0,
            failures: Vec::new(),
        };
        Some(Command::Download { entries })
    }

    fn apply_outcome(&mut self, outcome: TransferOutcome) {
        let Mode::Downloading {
            names,
            done,
            succeeded,
            failures,
        } = &mut self.mode
        else {
            return;
        };

        *done += 1;
        let last = if outcome.succeeded {
            *succeeded += 1;
            format!("{} done", outcome.source_name)
        } else {
            let reason = outcome.failure_reason.unwrap_or_default();
            failures.push((outcome.source_name.clone(), reason.clone()));
            format!("{} failed: {}", outcome.source_name, reason)
        };

        if *done < names.len() {
            self.status = format!(
                "{}. Downloading {}/{}: {}",
                last,
                *done + 1,
                names.len(),
                names[*done]
            );
            return;
        }

        let mut summary = format!("Downloaded {}/{}", succeeded, names.len());
        for (name, reason) in failures.iter() {
            summary.push_str(&format!("; {} failed: {}", name, reason));
        }
        self.status = summary;
        self.mode = Mode::Browsing;
        self.nav.reset_cursor();
    }
}
