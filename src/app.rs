use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Backend;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::async_ssh_client::SshSession;
use crate::browser::{Browser, Command, ListRequest, Message};
use crate::config::ConnectTarget;
use crate::error::Result;
use crate::events::AppEvent;
use crate::key_event::{KeyFlow, browser_action};
use crate::remote::{RemoteEntry, RemoteSession, list_directory};
use crate::transfer::{TransferJob, download};
use crate::ui::{PickerFlow, ServerPicker, draw_browser, draw_picker, list_height};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// How an interactive browse starts.
#[derive(Debug, Clone)]
pub struct BrowseOptions {
    /// Remote directory to open; the login directory when `None`.
    pub start_dir: Option<String>,
    /// Local directory downloads are written to.
    pub destination: PathBuf,
    pub show_hidden: bool,
}

/// Connect to `target` and browse it until the user quits.
///
/// Only a failed connection is an error; everything after that is reported
/// inside the browser.
pub async fn run_interactive_browse(
    target: &ConnectTarget,
    timeout: Duration,
    options: BrowseOptions,
) -> Result<()> {
    let session = Arc::new(SshSession::connect(target, timeout).await?);

    let result = browse_with_session(Arc::clone(&session), &target.to_string(), options).await;

    if let Err(e) = session.close().await {
        warn!("Error closing session to {}: {}", target, e);
    }
    result
}

/// Run the browser UI over an already open session.
pub async fn browse_with_session<S: RemoteSession + 'static>(
    session: Arc<S>,
    target: &str,
    options: BrowseOptions,
) -> Result<()> {
    let start_dir = match options.start_dir {
        Some(dir) => dir,
        None => remote_home(session.as_ref()).await,
    };
    tokio::fs::create_dir_all(&options.destination).await?;
    info!(
        "Browsing {}:{} (downloads to {})",
        target,
        start_dir,
        options.destination.display()
    );

    let mut browser = Browser::new(start_dir, options.show_hidden);
    let first = browser.initial_listing();
    let result = list_directory(session.as_ref(), &first.path, first.show_hidden).await;
    browser.update(Message::Listed {
        request: first.request,
        result,
    });

    let (tx, mut rx) = mpsc::channel::<AppEvent>(EVENT_CHANNEL_CAPACITY);
    let mut executor = Executor::new(session, options.destination, tx.clone());
    let input = spawn_input_pump(tx, executor.cancel_token());

    let result = {
        let terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))?;
        let mut app = BrowserApp::new(terminal, browser, target);
        match app.init_terminal() {
            Ok(()) => app.run(&mut rx, &mut executor).await,
            Err(e) => Err(e),
        }
        // app dropped here, terminal restored before waiting on transfers
    };

    executor.shutdown(&mut rx).await;
    if let Err(e) = input.await {
        debug!("Input task ended abnormally: {}", e);
    }
    result
}

/// The remote login directory, or `.` when `pwd` fails.
async fn remote_home<S: RemoteSession + ?Sized>(session: &S) -> String {
    match session.output("pwd").await {
        Ok(out) => {
            let dir = String::from_utf8_lossy(&out).trim().to_string();
            if dir.is_empty() { ".".to_string() } else { dir }
        }
        Err(e) => {
            warn!("Cannot determine remote home directory: {}", e);
            ".".to_string()
        }
    }
}

fn spawn_input_pump(tx: mpsc::Sender<AppEvent>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = EventStream::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => {
                    let event = match event {
                        None => break,
                        Some(Err(e)) => {
                            error!("Terminal input error: {}", e);
                            break;
                        }
                        Some(Ok(event)) => event,
                    };
                    if tx.send(AppEvent::Input(event)).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn enter_tui<B: Backend + Write>(terminal: &mut Terminal<B>) -> Result<()> {
    use crossterm::ExecutableCommand;
    use crossterm::terminal::{EnterAlternateScreen, enable_raw_mode};

    enable_raw_mode().inspect_err(|e| error!("Error enabling raw mode: {}", e))?;
    terminal
        .backend_mut()
        .execute(EnterAlternateScreen)
        .inspect_err(|e| error!("Error entering alternate screen: {}", e))?;
    terminal.hide_cursor()?;
    terminal.clear()?;
    Ok(())
}

fn leave_tui<B: Backend + Write>(terminal: &mut Terminal<B>) {
    use crossterm::execute;
    use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
}

/// Let the user choose one of `labels`; `None` when they cancel.
pub async fn pick_server(title: &str, labels: Vec<String>) -> Result<Option<usize>> {
    let terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))?;
    let mut app = PickerApp {
        terminal,
        picker: ServerPicker::new(title, labels),
    };
    enter_tui(&mut app.terminal)?;

    let mut events = EventStream::new();
    loop {
        let picker = &app.picker;
        app.terminal.draw(|f| {
            let area = f.area();
            draw_picker(f, area, picker);
        })?;

        let Some(event) = events.next().await else {
            return Ok(None);
        };
        if let Event::Key(key) = event? {
            match app.picker.handle_key(key) {
                PickerFlow::Continue => {}
                PickerFlow::Chosen(idx) => {
                    debug!("Picked server #{}", idx);
                    return Ok(Some(idx));
                }
                PickerFlow::Cancelled => return Ok(None),
            }
        }
    }
}

struct PickerApp<B: Backend + Write> {
    terminal: Terminal<B>,
    picker: ServerPicker,
}

impl<B: Backend + Write> Drop for PickerApp<B> {
    fn drop(&mut self) {
        leave_tui(&mut self.terminal);
    }
}

/// Runs browser commands off the UI loop and reports back through `tx`.
pub struct Executor<S> {
    session: Arc<S>,
    destination: PathBuf,
    tx: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl<S: RemoteSession + 'static> Executor<S> {
    pub fn new(session: Arc<S>, destination: PathBuf, tx: mpsc::Sender<AppEvent>) -> Self {
        Self {
            session,
            destination,
            tx,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn dispatch(&mut self, command: Command) -> KeyFlow {
        self.reap_finished();
        match command {
            Command::Quit => return KeyFlow::Quit,
            Command::List(request) => self.spawn_listing(request),
            Command::Download { entries } => self.spawn_batch(entries),
        }
        KeyFlow::Continue
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("Background task failed: {}", e);
            }
        }
    }

    fn spawn_listing(&mut self, request: ListRequest) {
        let session = Arc::clone(&self.session);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let ListRequest {
                request,
                path,
                show_hidden,
            } = request;
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = list_directory(session.as_ref(), &path, show_hidden) => result,
            };
            let _ = tx
                .send(AppEvent::Browser(Message::Listed { request, result }))
                .await;
        });
    }

    fn spawn_batch(&mut self, entries: Vec<RemoteEntry>) {
        let session = Arc::clone(&self.session);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let jobs: Vec<TransferJob> = entries
            .into_iter()
            .map(|entry| TransferJob::new(entry, &self.destination))
            .collect();
        self.tasks.spawn(run_batch(session, jobs, tx, cancel));
    }

    /// Stop new work, let the entry in flight finish, then return.
    pub async fn shutdown(mut self, rx: &mut mpsc::Receiver<AppEvent>) {
        self.cancel.cancel();
        loop {
            tokio::select! {
                joined = self.tasks.join_next() => match joined {
                    Some(Err(e)) => warn!("Background task failed: {}", e),
                    Some(Ok(())) => {}
                    None => break,
                },
                // keep draining so no task blocks on a full channel
                _ = rx.recv() => {}
            }
        }
    }
}

/// Download `jobs` one at a time, reporting each outcome in order.
async fn run_batch<S: RemoteSession + ?Sized>(
    session: Arc<S>,
    jobs: Vec<TransferJob>,
    tx: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
) {
    let total = jobs.len();
    info!("Starting download of {} entries", total);
    for (idx, job) in jobs.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Download cancelled after {}/{} entries", idx, total);
            return;
        }
        let outcome = download(session.as_ref(), &job.entry, &job.destination).await;
        let _ = tx
            .send(AppEvent::Browser(Message::TransferDone(outcome)))
            .await;
    }
    info!("Download of {} entries finished", total);
}

pub struct BrowserApp<B: Backend + Write> {
    terminal: Terminal<B>,
    browser: Browser,
    target: String,
    needs_redraw: bool,
}

impl<B: Backend + Write> Drop for BrowserApp<B> {
    fn drop(&mut self) {
        leave_tui(&mut self.terminal);
    }
}

impl<B: Backend + Write> BrowserApp<B> {
    pub fn new(terminal: Terminal<B>, browser: Browser, target: &str) -> Self {
        Self {
            terminal,
            browser,
            target: target.to_string(),
            needs_redraw: true,
        }
    }

    pub fn init_terminal(&mut self) -> Result<()> {
        enter_tui(&mut self.terminal)
    }

    pub fn mark_redraw(&mut self) {
        self.needs_redraw = true;
    }

    fn should_redraw(&mut self) -> bool {
        let should = self.needs_redraw;
        self.needs_redraw = false;
        should
    }

    fn draw(&mut self) -> Result<()> {
        let browser = &self.browser;
        let target = self.target.as_str();
        self.terminal.draw(|f| {
            let area = f.area();
            draw_browser(f, area, target, browser);
        })?;
        Ok(())
    }

    fn apply<S: RemoteSession + 'static>(
        &mut self,
        message: Message,
        executor: &mut Executor<S>,
    ) -> KeyFlow {
        self.mark_redraw();
        match self.browser.update(message) {
            Some(command) => executor.dispatch(command),
            None => KeyFlow::Continue,
        }
    }

    pub async fn run<S: RemoteSession + 'static>(
        &mut self,
        rx: &mut mpsc::Receiver<AppEvent>,
        executor: &mut Executor<S>,
    ) -> Result<()> {
        let size = self.terminal.size()?;
        self.apply(
            Message::Resize {
                height: list_height(size.height),
            },
            executor,
        );

        loop {
            if self.should_redraw() {
                self.draw()?;
            }

            let Some(ev) = rx.recv().await else {
                warn!("App event channel closed");
                break;
            };

            let flow = match ev {
                AppEvent::Input(Event::Key(key)) => match browser_action(key) {
                    Some(action) => self.apply(Message::Key(action), executor),
                    None => KeyFlow::Continue,
                },
                AppEvent::Input(Event::Resize(_, height)) => self.apply(
                    Message::Resize {
                        height: list_height(height),
                    },
                    executor,
                ),
                AppEvent::Input(_) => KeyFlow::Continue,
                AppEvent::Browser(message) => self.apply(message, executor),
            };

            if flow == KeyFlow::Quit {
                info!("Quit requested");
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Action;
    use crate::remote::testing::LocalShellSession;
    use std::fs;
    use std::path::Path;

    struct Harness {
        browser: Browser,
        executor: Executor<LocalShellSession>,
        rx: mpsc::Receiver<AppEvent>,
    }

    impl Harness {
        async fn open(remote_dir: &Path, destination: &Path, show_hidden: bool) -> Self {
            let session = Arc::new(LocalShellSession::new());
            let mut browser = Browser::new(remote_dir.to_string_lossy(), show_hidden);
            let first = browser.initial_listing();
            let result = list_directory(session.as_ref(), &first.path, first.show_hidden).await;
            browser.update(Message::Listed {
                request: first.request,
                result,
            });

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let executor = Executor::new(session, destination.to_path_buf(), tx);
            Self {
                browser,
                executor,
                rx,
            }
        }

        fn key(&mut self, action: Action) -> KeyFlow {
            match self.browser.update(Message::Key(action)) {
                Some(command) => self.executor.dispatch(command),
                None => KeyFlow::Continue,
            }
        }

        /// Feed completions back until `done` holds.
        async fn settle(&mut self, done: impl Fn(&Browser) -> bool) {
            while !done(&self.browser) {
                let event = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                    .await
                    .expect("timed out waiting for a completion")
                    .expect("event channel closed");
                if let AppEvent::Browser(message) = event
                    && let Some(command) = self.browser.update(message)
                {
                    self.executor.dispatch(command);
                }
            }
        }

        fn select(&mut self, name: &str) {
            let idx = self
                .browser
                .nav
                .entries
                .iter()
                .position(|e| e.name == name)
                .expect("entry not listed");
            self.key(Action::Home);
            for _ in 0..idx {
                self.key(Action::Down);
            }
            self.key(Action::ToggleSelect);
        }
    }

    fn names(browser: &Browser) -> Vec<String> {
        let mut names: Vec<String> = browser.nav.entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    fn seed_home(dir: &Path) {
        fs::write(dir.join("a.txt"), "hi").unwrap();
        fs::write(dir.join(".secret"), "s").unwrap();
        fs::create_dir(dir.join("logs")).unwrap();
        fs::write(dir.join("logs/x.log"), "log line\n").unwrap();
    }

    #[tokio::test]
    async fn test_browse_and_download_home() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let extracted = tempfile::tempdir().unwrap();
        seed_home(remote.path());

        let mut h = Harness::open(remote.path(), local.path(), false).await;
        assert_eq!(names(&h.browser), vec!["a.txt", "logs"]);

        h.select("a.txt");
        h.select("logs");
        assert_eq!(h.key(Action::Download), KeyFlow::Continue);
        assert!(h.browser.is_downloading());

        h.settle(|b| !b.is_downloading()).await;
        assert_eq!(h.browser.status, "Downloaded 2/2");
        assert!(h.browser.nav.selected.is_empty());

        assert_eq!(fs::read_to_string(local.path().join("a.txt")).unwrap(), "hi");
        let status = std::process::Command::new("tar")
            .arg("-xzf")
            .arg(local.path().join("logs.tar.gz"))
            .arg("-C")
            .arg(extracted.path())
            .status()
            .unwrap();
        assert!(status.success());
        assert!(extracted.path().join("logs/x.log").exists());

        h.executor.shutdown(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        for name in ["1.txt", "2.txt", "3.txt"] {
            fs::write(remote.path().join(name), name).unwrap();
        }

        let mut h = Harness::open(remote.path(), local.path(), false).await;
        for name in ["1.txt", "2.txt", "3.txt"] {
            h.select(name);
        }
        // the second entry vanishes before the batch reaches it
        fs::remove_file(remote.path().join("2.txt")).unwrap();
        h.key(Action::Download);

        h.settle(|b| !b.is_downloading()).await;
        assert!(h.browser.status.starts_with("Downloaded 2/3; 2.txt failed"));
        assert!(local.path().join("1.txt").exists());
        assert!(!local.path().join("2.txt").exists());
        assert!(local.path().join("3.txt").exists());

        h.executor.shutdown(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_navigate_into_and_back_out() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        seed_home(remote.path());

        let mut h = Harness::open(remote.path(), local.path(), false).await;
        let root = h.browser.nav.current_dir().to_string();

        h.select("logs");
        h.key(Action::Enter);
        h.settle(|b| !b.is_listing()).await;
        assert_eq!(names(&h.browser), vec!["x.log"]);
        assert!(h.browser.nav.selected.is_empty());
        assert_eq!(h.browser.nav.entries[0].path, format!("{root}/logs/x.log"));

        h.key(Action::ToggleHidden);
        h.settle(|b| !b.is_listing()).await;
        assert!(h.browser.nav.show_hidden);

        h.key(Action::Back);
        h.settle(|b| !b.is_listing()).await;
        assert_eq!(h.browser.nav.current_dir(), root);
        assert_eq!(names(&h.browser), vec![".secret", "a.txt", "logs"]);

        h.executor.shutdown(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_finished_tasks_are_reaped() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        seed_home(remote.path());

        let mut h = Harness::open(remote.path(), local.path(), false).await;
        for _ in 0..8 {
            h.key(Action::Refresh);
            h.settle(|b| !b.is_listing()).await;
            // let the finished listing task return after sending its result
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        h.key(Action::Refresh);
        assert!(h.executor.tasks.len() <= 2, "{} tasks kept", h.executor.tasks.len());

        h.settle(|b| !b.is_listing()).await;
        h.executor.shutdown(&mut h.rx).await;
    }

    #[tokio::test]
    async fn test_quit_while_downloading_leaves_no_partial_files() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let payload = vec![7u8; 512 * 1024];
        for name in ["big1.bin", "big2.bin", "big3.bin"] {
            fs::write(remote.path().join(name), &payload).unwrap();
        }

        let mut h = Harness::open(remote.path(), local.path(), false).await;
        for name in ["big1.bin", "big2.bin", "big3.bin"] {
            h.select(name);
        }
        h.key(Action::Download);
        assert_eq!(h.key(Action::Quit), KeyFlow::Quit);

        let Harness { executor, mut rx, .. } = h;
        tokio::time::timeout(Duration::from_secs(30), executor.shutdown(&mut rx))
            .await
            .expect("shutdown waits only for the entry in flight");

        for entry in fs::read_dir(local.path()).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(!name.ends_with(".part"), "leftover temp file {name}");
            assert_eq!(fs::read(&path).unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn test_remote_home_falls_back_to_dot() {
        struct NoPwd;
        impl RemoteSession for NoPwd {
            async fn output(&self, command: &str) -> Result<Vec<u8>> {
                Err(crate::error::AppError::RemoteCommandFailed {
                    command: command.to_string(),
                    status: Some(127),
                    stderr: "not found".to_string(),
                })
            }
            async fn stream_stdout(&self, command: &str) -> Result<crate::remote::RemoteStdout> {
                Err(crate::error::AppError::RemoteCommandFailed {
                    command: command.to_string(),
                    status: None,
                    stderr: String::new(),
                })
            }
            async fn close(&self) -> Result<()> {
                Ok(())
            }
        }

        assert_eq!(remote_home(&NoPwd).await, ".");
        let local = LocalShellSession::new();
        assert!(remote_home(&local).await.starts_with('/'));
    }
}
