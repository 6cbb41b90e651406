use std::{
    io::{self, Stdout},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Clear, List, ListItem, ListState, Paragraph, Scrollbar,
        ScrollbarOrientation, ScrollbarState, Wrap,
    },
    Frame, Terminal,
};

use crate::{
    config::AppConfig,
    flatten::{toggle_plan, ExpansionState, Row},
    model::{format_bytes, format_progress, FileEntry, NameOverride, NoOverride, PrivacyMask},
    render::{checkbox, row_line},
    search::{flatten_matching, MatchCache},
    source::{self, SourceResult},
    tree::{build_tree_with, BuiltTree, TreeNode},
    viewport::{row_top, Viewport},
};

type Backend = ratatui::backend::CrosstermBackend<Stdout>;

const ROW_HEIGHT: usize = 1;

pub fn run(config: AppConfig) -> Result<()> {
    let items = source::load_items(&config.input)
        .with_context(|| format!("failed to load {}", config.input.display()))?;
    let mut terminal = setup_terminal()?;
    let (event_tx, event_rx) = unbounded();
    let (source_tx, source_rx) = unbounded();

    let input_handle = spawn_input_thread(event_tx.clone());
    let worker_handle = spawn_source_worker(
        config.input.clone(),
        source_rx,
        event_tx.clone(),
        config.poll_interval,
    );

    let mut app = App::new(&config, items);
    app.set_status(StatusUpdate::info(format!(
        "Loaded {} files",
        app.tree.total().total
    )));
    app.report_skipped();

    let loop_result = run_loop(&mut terminal, &mut app, event_rx, source_tx.clone());

    drop(source_tx);
    drop(event_tx);

    restore_terminal(&mut terminal)?;
    input_handle.join().ok();
    worker_handle.join().ok();

    loop_result
}

fn run_loop(
    terminal: &mut Terminal<Backend>,
    app: &mut App,
    events: Receiver<AppEvent>,
    source_tx: Sender<SourceCommand>,
) -> Result<()> {
    terminal.draw(|f| app.render(f))?;
    loop {
        let event = match events.recv() {
            Ok(event) => event,
            Err(_) => break,
        };
        if app.process_event(event, &source_tx)? {
            break;
        }
        terminal.draw(|f| app.render(f))?;
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn setup_terminal() -> Result<Terminal<Backend>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<Backend>) -> Result<()> {
    disable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, DisableBracketedPaste, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(tx: Sender<AppEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let tick_rate = Duration::from_millis(250);
        loop {
            match event::poll(tick_rate) {
                Ok(true) => match event::read() {
                    Ok(evt) => {
                        if tx.send(AppEvent::Input(evt)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(AppEvent::Status(StatusUpdate::error(format!(
                            "Input error: {err}"
                        ))));
                    }
                },
                Ok(false) | Err(_) => {
                    if tx.send(AppEvent::Tick).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_source_worker(
    path: PathBuf,
    rx: Receiver<SourceCommand>,
    tx: Sender<AppEvent>,
    poll_interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || source_worker_loop(path, rx, tx, poll_interval))
}

fn source_worker_loop(
    path: PathBuf,
    rx: Receiver<SourceCommand>,
    tx: Sender<AppEvent>,
    poll_interval: Duration,
) {
    let mut last_seen = source::modified(&path).ok();
    let poll_enabled = poll_interval > Duration::ZERO;
    if !poll_enabled {
        while let Ok(cmd) = rx.recv() {
            handle_command(&path, cmd, &tx, &mut last_seen);
        }
        return;
    }
    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(cmd) => handle_command(&path, cmd, &tx, &mut last_seen),
            Err(RecvTimeoutError::Timeout) => poll_for_change(&path, &tx, &mut last_seen),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_command(
    path: &Path,
    cmd: SourceCommand,
    tx: &Sender<AppEvent>,
    last_seen: &mut Option<SystemTime>,
) {
    match cmd {
        SourceCommand::Reload => {
            *last_seen = source::modified(path).ok();
            send_items(path, LoadOrigin::Manual, tx);
        }
        SourceCommand::Save { items, revision } => {
            handle_save(path, items, revision, tx, last_seen)
        }
    }
}

fn poll_for_change(path: &Path, tx: &Sender<AppEvent>, last_seen: &mut Option<SystemTime>) {
    match source::modified(path) {
        Ok(stamp) if Some(stamp) != *last_seen => {
            debug!("{} changed on disk", path.display());
            *last_seen = Some(stamp);
            send_items(path, LoadOrigin::Changed, tx);
        }
        Ok(_) => {}
        Err(err) => debug!("poll failed: {err}"),
    }
}

fn send_items(path: &Path, origin: LoadOrigin, tx: &Sender<AppEvent>) {
    let result = source::load_items(path);
    let _ = tx.send(AppEvent::Items { result, origin });
}

fn handle_save(
    path: &Path,
    items: Vec<FileEntry>,
    revision: u64,
    tx: &Sender<AppEvent>,
    last_seen: &mut Option<SystemTime>,
) {
    match source::save_items(path, &items) {
        Ok(()) => {
            *last_seen = source::modified(path).ok();
            debug!("saved {} entries to {}", items.len(), path.display());
            let _ = tx.send(AppEvent::Saved(revision));
            let _ = tx.send(AppEvent::Status(StatusUpdate::success(format!(
                "Saved {} files",
                items.len()
            ))));
        }
        Err(err) => {
            let _ = tx.send(AppEvent::Status(StatusUpdate::error(format!(
                "Save failed: {err}"
            ))));
        }
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    Items {
        result: SourceResult<Vec<FileEntry>>,
        origin: LoadOrigin,
    },
    Status(StatusUpdate),
    Saved(u64),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoadOrigin {
    Manual,
    Changed,
}

#[derive(Clone)]
struct StatusUpdate {
    text: String,
    level: StatusLevel,
}

impl StatusUpdate {
    fn info(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Info,
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Success,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Warning,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            level: StatusLevel::Error,
        }
    }
}

#[derive(Clone, Copy)]
enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone)]
struct StatusMessage {
    text: String,
    level: StatusLevel,
    expires_at: Option<Instant>,
}

impl StatusMessage {
    fn from_update(update: StatusUpdate) -> Self {
        let duration = match update.level {
            StatusLevel::Info => Duration::from_secs(4),
            StatusLevel::Success => Duration::from_secs(5),
            StatusLevel::Warning => Duration::from_secs(6),
            StatusLevel::Error => Duration::from_secs(8),
        };
        Self {
            text: update.text,
            level: update.level,
            expires_at: Some(Instant::now() + duration),
        }
    }
}

struct App {
    source_label: String,
    items: Vec<FileEntry>,
    tree: BuiltTree<FileEntry>,
    expansion: ExpansionState,
    matches: MatchCache,
    viewport: Viewport,
    selected: usize,
    selected_id: Option<String>,
    filter_text: String,
    privacy: bool,
    dirty: bool,
    revision: u64,
    status: Option<StatusMessage>,
    toast: Option<StatusMessage>,
    mode: InputMode,
    should_quit: bool,
}

impl App {
    fn new(config: &AppConfig, items: Vec<FileEntry>) -> Self {
        let mut app = Self {
            source_label: config.input.display().to_string(),
            items,
            tree: BuiltTree {
                roots: Vec::new(),
                branch_ids: Vec::new(),
                skipped: Vec::new(),
            },
            expansion: ExpansionState::new(config.expand_new),
            matches: MatchCache::default(),
            viewport: Viewport::new(0),
            selected: 0,
            selected_id: None,
            filter_text: String::new(),
            privacy: config.privacy,
            dirty: false,
            revision: 0,
            status: None,
            toast: None,
            mode: InputMode::Normal,
            should_quit: false,
        };
        app.rebuild();
        app
    }

    fn rows(&self) -> Vec<Row<'_, FileEntry>> {
        flatten_matching(&self.tree.roots, &self.expansion, &self.matches)
    }

    fn current_node(&self) -> Option<&TreeNode<FileEntry>> {
        self.rows().get(self.selected).map(|row| row.node)
    }

    fn rebuild(&mut self) {
        let overrides: &dyn NameOverride = if self.privacy {
            &PrivacyMask
        } else {
            &NoOverride
        };
        let tree = build_tree_with(self.items.iter().cloned(), overrides);
        for skipped in &tree.skipped {
            debug!("skipping {:?}: {}", skipped.path, skipped.reason.label());
        }
        self.expansion = self.expansion.reconcile(&tree.branch_ids);
        self.matches = MatchCache::new(&tree.roots, &self.filter_text);
        self.tree = tree;
        self.restore_selection();
    }

    fn report_skipped(&mut self) {
        let count = self.tree.skipped.len();
        if count > 0 {
            self.set_status(StatusUpdate::warning(format!(
                "Skipped {count} malformed or conflicting entries"
            )));
        }
    }

    fn restore_selection(&mut self) {
        let rows = flatten_matching(&self.tree.roots, &self.expansion, &self.matches);
        if rows.is_empty() {
            self.selected = 0;
            self.selected_id = None;
            return;
        }
        let position = self
            .selected_id
            .as_deref()
            .and_then(|id| rows.iter().position(|row| row.node.id == id));
        let index = position.unwrap_or_else(|| self.selected.min(rows.len() - 1));
        self.selected = index;
        self.selected_id = Some(rows[index].node.id.clone());
    }

    fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(frame.size());
        self.render_header(frame, chunks[0]);
        self.render_body(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);
        self.render_toast(frame);
        match &self.mode {
            InputMode::Confirm(confirm) => {
                let area = centered_rect(50, 30, frame.size());
                let block = Block::default().title(confirm.title).borders(Borders::ALL);
                let text = vec![
                    Line::from(confirm.message.clone()),
                    Line::from(Span::styled(
                        "Press y to confirm, n or Esc to cancel",
                        Style::default().fg(Color::Yellow),
                    )),
                ];
                let paragraph = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
                frame.render_widget(Clear, area);
                frame.render_widget(paragraph, area);
            }
            InputMode::Help => {
                let area = centered_rect(70, 70, frame.size());
                let block = Block::default().title("Key Bindings").borders(Borders::ALL);
                let paragraph = Paragraph::new(help_lines())
                    .block(block)
                    .wrap(Wrap { trim: false });
                frame.render_widget(Clear, area);
                frame.render_widget(paragraph, area);
            }
            _ => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let total = self.tree.total();
        let mut title = vec![
            Span::styled("Files", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::raw(&self.source_label),
        ];
        if self.dirty {
            title.push(Span::styled(
                "  [modified]",
                Style::default().fg(Color::Yellow),
            ));
        }
        if self.privacy {
            title.push(Span::styled(
                "  [privacy]",
                Style::default().fg(Color::Magenta),
            ));
        }
        let mut lines = vec![
            Line::from(title),
            Line::from(format!(
                "{} files  |  {}  |  {} done  |  {}/{} wanted",
                total.total,
                format_bytes(total.size).trim_start(),
                format_progress(total.average_progress()).trim_start(),
                total.included,
                total.total
            )),
        ];
        if let Some(status) = &self.status {
            lines.push(Line::from(Span::styled(
                status.text.clone(),
                status_style(status.level),
            )));
        }
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::raw(" Torrent ")),
        );
        frame.render_widget(paragraph, area);
    }

    fn render_body(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(75), Constraint::Percentage(25)])
            .split(area);
        self.render_list(frame, chunks[0]);
        self.render_detail(frame, chunks[1]);
    }

    fn render_list(&mut self, frame: &mut Frame, area: Rect) {
        let rows = flatten_matching(&self.tree.roots, &self.expansion, &self.matches);
        let height = usize::from(area.height.saturating_sub(2));
        self.viewport = self
            .viewport
            .with_height(height)
            .scroll_to(self.selected, rows.len());
        let window = self.viewport.window(rows.len());
        let start = window.start;
        let mut items = rows[window]
            .iter()
            .map(|row| ListItem::new(Line::from(row_line(row, &self.expansion))))
            .collect::<Vec<_>>();
        let mut state = ListState::default();
        if items.is_empty() {
            let empty = if self.matches.is_active() {
                "No files match the filter"
            } else {
                "No files loaded"
            };
            items.push(ListItem::new(Line::from(empty)));
        } else {
            state.select(Some(self.selected.saturating_sub(start)));
        }
        let block = Block::default().borders(Borders::ALL).title(Span::raw(format!(
            " Tree ({}/{}) ",
            if rows.is_empty() { 0 } else { self.selected + 1 },
            rows.len()
        )));
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow))
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, area, &mut state);

        if rows.len() > height {
            let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(None)
                .end_symbol(None);
            let mut scrollbar_state = ScrollbarState::new(row_top(rows.len(), ROW_HEIGHT))
                .position(row_top(self.viewport.offset, ROW_HEIGHT));
            frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
        }
    }

    fn render_detail(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Span::raw(" Details "));
        let Some(node) = self.current_node() else {
            let paragraph = Paragraph::new("Nothing selected")
                .block(block)
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
            return;
        };
        let selection = node.selection();
        let mut lines = vec![Line::from(Span::styled(
            node.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ))];
        if !self.privacy {
            let path = node.item().map_or(node.id.as_str(), |entry| entry.path.as_str());
            lines.push(Line::from(format!("Path: {path}")));
        }
        lines.push(Line::from(format!(
            "Size: {}  Progress: {}",
            format_bytes(node.aggregate.size).trim_start(),
            format_progress(node.progress()).trim_start()
        )));
        lines.push(Line::from(format!(
            "Wanted: {} {}/{}",
            checkbox(selection),
            node.aggregate.included,
            node.aggregate.total
        )));
        let paragraph = Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let mode_label = match &self.mode {
            InputMode::Normal => "NORMAL",
            InputMode::Filter { .. } => "FILTER",
            InputMode::Confirm(_) => "CONFIRM",
            InputMode::Help => "HELP",
        };
        let filter_display = match &self.mode {
            InputMode::Filter { buffer } => format!("/{}", buffer),
            _ => {
                if self.filter_text.is_empty() {
                    "(no filter)".to_string()
                } else {
                    format!("/{} ({} hits)", self.filter_text, self.matches.match_count())
                }
            }
        };
        let summary = Line::from(format!(
            "Mode {mode_label} | Filter {filter_display} | {} open",
            self.expansion.expanded_ids().count()
        ));
        let sections = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(14)])
            .split(area);
        let left = Paragraph::new(summary).wrap(Wrap { trim: true });
        frame.render_widget(left, sections[0]);
        let help_label =
            Paragraph::new(Line::from(Span::raw("Help [?]"))).alignment(Alignment::Right);
        frame.render_widget(help_label, sections[1]);
    }

    fn render_toast(&self, frame: &mut Frame) {
        if !matches!(self.mode, InputMode::Normal | InputMode::Filter { .. }) {
            return;
        }
        let Some(toast) = &self.toast else {
            return;
        };
        let frame_area = frame.size();
        if frame_area.width < 20 || frame_area.height < 5 {
            return;
        }
        let padding = 2;
        let max_width = frame_area.width.saturating_sub(padding * 2);
        let width = max_width.clamp(20, 60);
        let height = 3;
        let x = frame_area
            .x
            .saturating_add(frame_area.width.saturating_sub(width + padding));
        let y = frame_area
            .y
            .saturating_add(frame_area.height.saturating_sub(height + padding));
        let area = Rect::new(x, y, width, height);
        let text = Line::from(Span::styled(toast.text.clone(), status_style(toast.level)));
        let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::raw(" Notice ")),
        );
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }

    fn process_event(&mut self, event: AppEvent, source_tx: &Sender<SourceCommand>) -> Result<bool> {
        match event {
            AppEvent::Input(event) => self.handle_input(event, source_tx),
            AppEvent::Tick => {
                self.expire_status();
                Ok(false)
            }
            AppEvent::Items { result, origin } => {
                self.apply_items(result, origin);
                Ok(false)
            }
            AppEvent::Status(update) => {
                self.set_status(update);
                Ok(false)
            }
            AppEvent::Saved(revision) => {
                if revision == self.revision {
                    self.dirty = false;
                }
                Ok(false)
            }
        }
    }

    fn handle_input(&mut self, event: Event, source_tx: &Sender<SourceCommand>) -> Result<bool> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    self.should_quit = true;
                    return Ok(true);
                }
                if matches!(self.mode, InputMode::Normal) {
                    return self.handle_normal_key(key, source_tx);
                }
                match &mut self.mode {
                    InputMode::Filter { buffer } => {
                        let mut action = FilterAction::None;
                        match key.code {
                            KeyCode::Enter => {
                                action = FilterAction::Apply(buffer.trim().to_string());
                            }
                            KeyCode::Esc => {
                                action = FilterAction::Cancel;
                            }
                            KeyCode::Backspace => {
                                buffer.pop();
                            }
                            KeyCode::Char(c) => {
                                buffer.push(c);
                            }
                            _ => {}
                        }
                        match action {
                            FilterAction::Apply(value) => {
                                self.mode = InputMode::Normal;
                                self.apply_filter_text(value);
                            }
                            FilterAction::Cancel => {
                                self.mode = InputMode::Normal;
                            }
                            FilterAction::None => {}
                        }
                        Ok(false)
                    }
                    InputMode::Confirm(confirm) => {
                        let pending = confirm.action;
                        match key.code {
                            KeyCode::Char('y') | KeyCode::Enter => {
                                self.mode = InputMode::Normal;
                                return Ok(self.run_pending(pending, source_tx));
                            }
                            KeyCode::Char('n') | KeyCode::Esc => {
                                self.mode = InputMode::Normal;
                                self.set_status(StatusUpdate::info("Cancelled"));
                            }
                            _ => {}
                        }
                        Ok(false)
                    }
                    InputMode::Help => {
                        match key.code {
                            KeyCode::Char('?')
                            | KeyCode::Esc
                            | KeyCode::Enter
                            | KeyCode::Char('q') => {
                                self.mode = InputMode::Normal;
                            }
                            _ => {}
                        }
                        Ok(false)
                    }
                    InputMode::Normal => Ok(false),
                }
            }
            Event::Paste(data) => {
                match &mut self.mode {
                    InputMode::Filter { buffer } => buffer.push_str(&data),
                    InputMode::Normal => {
                        self.mode = InputMode::Filter {
                            buffer: data.trim().to_string(),
                        };
                    }
                    _ => {}
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent, source_tx: &Sender<SourceCommand>) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => {
                if self.dirty {
                    self.mode = InputMode::Confirm(ConfirmState::quit());
                    return Ok(false);
                }
                self.should_quit = true;
                Ok(true)
            }
            KeyCode::Char('R') => {
                if self.dirty {
                    self.mode = InputMode::Confirm(ConfirmState::reload());
                } else {
                    self.queue_reload(source_tx);
                }
                Ok(false)
            }
            KeyCode::Char('s') => {
                self.queue_save(source_tx);
                Ok(false)
            }
            KeyCode::Char(' ') => {
                self.toggle_selected_inclusion();
                Ok(false)
            }
            KeyCode::Enter => {
                self.toggle_selected_expansion();
                Ok(false)
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.expand_selected();
                Ok(false)
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.collapse_selected();
                Ok(false)
            }
            KeyCode::Char('e') => {
                self.expansion = self.expansion.expand_all();
                self.restore_selection();
                Ok(false)
            }
            KeyCode::Char('E') => {
                self.expansion = self.expansion.collapse_all();
                self.restore_selection();
                Ok(false)
            }
            KeyCode::Char('p') => {
                self.privacy = !self.privacy;
                self.rebuild();
                let label = if self.privacy { "on" } else { "off" };
                self.set_status(StatusUpdate::info(format!("Privacy mode {label}")));
                Ok(false)
            }
            KeyCode::Char('/') => {
                self.mode = InputMode::Filter {
                    buffer: self.filter_text.clone(),
                };
                Ok(false)
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_selection(1);
                Ok(false)
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_selection(-1);
                Ok(false)
            }
            KeyCode::Char('g') | KeyCode::Home => {
                self.goto_top();
                Ok(false)
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.goto_bottom();
                Ok(false)
            }
            KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.move_selection(self.half_page());
                Ok(false)
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.move_selection(-self.half_page());
                Ok(false)
            }
            KeyCode::PageDown => {
                self.move_selection(self.viewport.height.max(1) as isize);
                Ok(false)
            }
            KeyCode::PageUp => {
                self.move_selection(-(self.viewport.height.max(1) as isize));
                Ok(false)
            }
            KeyCode::Char('?') => {
                self.mode = InputMode::Help;
                Ok(false)
            }
            KeyCode::Esc => {
                self.clear_filter();
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn run_pending(&mut self, action: PendingAction, source_tx: &Sender<SourceCommand>) -> bool {
        match action {
            PendingAction::Quit => {
                self.should_quit = true;
                true
            }
            PendingAction::Reload => {
                self.queue_reload(source_tx);
                false
            }
        }
    }

    fn half_page(&self) -> isize {
        (self.viewport.height / 2).max(1) as isize
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.rows().len();
        if len == 0 {
            return;
        }
        let max_index = len as isize - 1;
        let next = (self.selected as isize + delta).clamp(0, max_index) as usize;
        self.select_index(next);
    }

    fn goto_top(&mut self) {
        if !self.rows().is_empty() {
            self.select_index(0);
        }
    }

    fn goto_bottom(&mut self) {
        let len = self.rows().len();
        if len > 0 {
            self.select_index(len - 1);
        }
    }

    fn select_index(&mut self, index: usize) {
        self.selected = index;
        self.selected_id = self.current_node().map(|node| node.id.clone());
    }

    fn select_id(&mut self, id: &str) {
        let position = self.rows().iter().position(|row| row.node.id == id);
        if let Some(index) = position {
            self.select_index(index);
        }
    }

    fn toggle_selected_expansion(&mut self) {
        let Some(id) = self
            .current_node()
            .filter(|node| node.is_branch())
            .map(|node| node.id.clone())
        else {
            return;
        };
        self.expansion = self.expansion.toggle(&id);
        self.restore_selection();
    }

    fn expand_selected(&mut self) {
        let Some(id) = self
            .current_node()
            .filter(|node| node.is_branch())
            .map(|node| node.id.clone())
        else {
            return;
        };
        self.expansion = self.expansion.expand(&id);
        self.restore_selection();
    }

    /// Collapses an open branch, otherwise moves to the parent row.
    fn collapse_selected(&mut self) {
        let Some((id, is_open)) = self.current_node().map(|node| {
            (
                node.id.clone(),
                node.is_branch() && self.expansion.is_expanded(&node.id),
            )
        }) else {
            return;
        };
        if is_open {
            self.expansion = self.expansion.collapse(&id);
            self.restore_selection();
        } else if let Some((parent, _)) = id.rsplit_once('/') {
            self.select_id(parent);
        }
    }

    fn toggle_selected_inclusion(&mut self) {
        let Some(change) = self.current_node().map(toggle_plan) else {
            self.set_status(StatusUpdate::warning("Nothing selected"));
            return;
        };
        let count = change.ids.len();
        let included = change.included;
        change.apply(&mut self.items);
        self.dirty = true;
        self.revision += 1;
        self.rebuild();
        let verb = if included { "Wanted" } else { "Skipped" };
        let noun = if count == 1 { "file" } else { "files" };
        self.set_status(StatusUpdate::info(format!("{verb} {count} {noun}")));
    }

    fn clear_filter(&mut self) {
        if self.filter_text.is_empty() {
            return;
        }
        self.apply_filter_text(String::new());
    }

    fn apply_filter_text(&mut self, value: String) {
        self.matches = MatchCache::new(&self.tree.roots, &value);
        self.filter_text = value;
        self.restore_selection();
    }

    fn expire_status(&mut self) {
        let now = Instant::now();
        if self
            .status
            .as_ref()
            .and_then(|status| status.expires_at)
            .is_some_and(|expiry| now >= expiry)
        {
            self.status = None;
        }
        if self
            .toast
            .as_ref()
            .and_then(|toast| toast.expires_at)
            .is_some_and(|expiry| now >= expiry)
        {
            self.toast = None;
        }
    }

    fn set_status(&mut self, update: StatusUpdate) {
        let message = StatusMessage::from_update(update.clone());
        if matches!(update.level, StatusLevel::Warning | StatusLevel::Error) {
            self.toast = Some(message.clone());
        }
        self.status = Some(message);
    }

    fn queue_reload(&mut self, source_tx: &Sender<SourceCommand>) {
        self.set_status(StatusUpdate::info("Reloading…"));
        if source_tx.send(SourceCommand::Reload).is_err() {
            self.set_status(StatusUpdate::error("Failed to queue reload"));
        }
    }

    fn queue_save(&mut self, source_tx: &Sender<SourceCommand>) {
        if !self.dirty {
            self.set_status(StatusUpdate::info("No changes to save"));
            return;
        }
        self.set_status(StatusUpdate::info("Saving…"));
        if source_tx
            .send(SourceCommand::Save {
                items: self.items.clone(),
                revision: self.revision,
            })
            .is_err()
        {
            self.set_status(StatusUpdate::error("Failed to queue save"));
        }
    }

    fn apply_items(&mut self, result: SourceResult<Vec<FileEntry>>, origin: LoadOrigin) {
        match result {
            Ok(items) => {
                if self.dirty && origin == LoadOrigin::Changed {
                    self.set_status(StatusUpdate::warning(
                        "File changed on disk; press R to discard local changes",
                    ));
                    return;
                }
                self.items = items;
                self.dirty = false;
                self.rebuild();
                self.set_status(StatusUpdate::success(format!(
                    "Loaded {} files",
                    self.tree.total().total
                )));
                self.report_skipped();
            }
            Err(err) => {
                self.set_status(StatusUpdate::error(format!("Load failed: {err}")));
            }
        }
    }
}

#[derive(Clone, Copy)]
enum PendingAction {
    Quit,
    Reload,
}

#[derive(Clone)]
struct ConfirmState {
    title: &'static str,
    message: &'static str,
    action: PendingAction,
}

impl ConfirmState {
    fn quit() -> Self {
        Self {
            title: "Unsaved changes",
            message: "Quit without saving wanted flags?",
            action: PendingAction::Quit,
        }
    }

    fn reload() -> Self {
        Self {
            title: "Unsaved changes",
            message: "Reload from disk and discard local changes?",
            action: PendingAction::Reload,
        }
    }
}

enum InputMode {
    Normal,
    Filter { buffer: String },
    Confirm(ConfirmState),
    Help,
}

enum FilterAction {
    None,
    Apply(String),
    Cancel,
}

enum SourceCommand {
    Reload,
    Save { items: Vec<FileEntry>, revision: u64 },
}

fn status_style(level: StatusLevel) -> Style {
    match level {
        StatusLevel::Info => Style::default().fg(Color::Blue),
        StatusLevel::Success => Style::default().fg(Color::Green),
        StatusLevel::Warning => Style::default().fg(Color::Yellow),
        StatusLevel::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);
    vertical[1]
}

fn help_lines() -> Vec<Line<'static>> {
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ))
    };
    vec![
        heading("Navigation"),
        Line::from("  j / k: move selection"),
        Line::from("  g / G: jump to first / last"),
        Line::from("  Ctrl+d / Ctrl+u: half-page down/up"),
        Line::from("  l / h: expand / collapse (h on a file jumps to its folder)"),
        Line::from("  Enter: toggle folder"),
        Line::from("  e / E: expand / collapse everything"),
        Line::from(""),
        heading("Actions"),
        Line::from("  Space: toggle wanted for file or folder"),
        Line::from("  s: save wanted flags"),
        Line::from("  R: reload from disk"),
        Line::from("  p: toggle privacy mode"),
        Line::from("  /: filter tree"),
        Line::from("  Esc: clear filter / cancel dialog"),
        Line::from("  ?: toggle this help"),
        Line::from("  q or Ctrl+c: quit"),
    ]
}
