use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::runtime::Handle;

use crate::binder::{
    run_entry, BinderError, CalendarBinder, EntryOutcome, EntryTicket, MonthRequest, RenderStatus,
};
use crate::calendar::CalendarCursor;
use crate::config::AppConfig;
use crate::dialog::{ChannelDialog, DialogRequest};
use crate::storage::{RecordStore, StoreError, StoreResult, WeightRecord};
use crate::summary::{confirm_removal, MonthlySummary, RemovalOutcome, SummaryRequest};
use crate::ui;

pub mod state;

pub use state::{AppState, FocusPane, Notice, OverlayState};

enum Action {
    Quit,
    PrevMonth,
    NextMonth,
    MoveDay(isize),
    MoveRow(isize),
    ToggleFocus,
    SetWeight,
    RemoveRecord,
    Refresh,
}

/// Results of store work, delivered back to the UI thread.
#[derive(Debug)]
pub enum AppEvent {
    MonthLoaded {
        request: MonthRequest,
        result: StoreResult<Vec<WeightRecord>>,
    },
    SummaryLoaded {
        request: SummaryRequest,
        result: StoreResult<Vec<WeightRecord>>,
    },
    EntryCommitting {
        ticket: EntryTicket,
        weight: f64,
    },
    EntryFinished {
        ticket: EntryTicket,
        outcome: EntryOutcome,
    },
    RemovalFinished {
        outcome: RemovalOutcome,
    },
}

pub struct App<S: RecordStore + 'static> {
    pub config: Arc<AppConfig>,
    runtime: Handle,
    state: AppState<S>,
    dialog: ChannelDialog,
    dialog_rx: Receiver<DialogRequest>,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
    should_quit: bool,
    tick_rate: Duration,
    notice_ttl: Duration,
}

impl<S: RecordStore + 'static> App<S> {
    pub fn new(config: Arc<AppConfig>, store: Arc<S>, runtime: Handle) -> Self {
        Self::with_cursor(config, store, runtime, CalendarCursor::starting_today())
    }

    pub fn with_cursor(
        config: Arc<AppConfig>,
        store: Arc<S>,
        runtime: Handle,
        cursor: CalendarCursor,
    ) -> Self {
        let binder = CalendarBinder::new(Arc::clone(&store), cursor, config.entry_mode);
        let summary = MonthlySummary::new(store, cursor.current());
        let (dialog_tx, dialog_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        Self {
            tick_rate: config.ui.tick_rate(),
            notice_ttl: config.ui.notice_duration(),
            config,
            runtime,
            state: AppState::new(binder, summary),
            dialog: ChannelDialog::new(dialog_tx),
            dialog_rx,
            events_tx,
            events_rx,
            should_quit: false,
        }
    }

    pub fn state(&self) -> &AppState<S> {
        &self.state
    }

    pub fn run(&mut self) -> Result<()> {
        self.reload();
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            self.drain_channels();

            terminal
                .draw(|frame| ui::draw_app(frame, &self.state))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Resize(_, _) => {}
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        self.state.dismiss_all();
        Ok(())
    }

    fn on_tick(&mut self) {
        self.state.expire_notice(Instant::now());
    }

    /// Applies every pending dialog request and store result without blocking.
    pub fn drain_channels(&mut self) {
        while let Ok(request) = self.dialog_rx.try_recv() {
            self.state
                .accept_dialog(request, self.notice_ttl, Instant::now());
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let calendar = self.state.focus == FocusPane::Calendar;

        let action = match key.code {
            KeyCode::Char('q') if plain => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('p') | KeyCode::Char('[') | KeyCode::PageUp if plain => {
                Some(Action::PrevMonth)
            }
            KeyCode::Char('n') | KeyCode::Char(']') | KeyCode::PageDown if plain => {
                Some(Action::NextMonth)
            }
            KeyCode::Char('h') | KeyCode::Left if calendar => Some(Action::MoveDay(-1)),
            KeyCode::Char('l') | KeyCode::Right if calendar => Some(Action::MoveDay(1)),
            KeyCode::Char('k') | KeyCode::Up if calendar => Some(Action::MoveDay(-7)),
            KeyCode::Char('j') | KeyCode::Down if calendar => Some(Action::MoveDay(7)),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::MoveRow(-1)),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::MoveRow(1)),
            KeyCode::Tab => Some(Action::ToggleFocus),
            KeyCode::Enter if calendar => Some(Action::SetWeight),
            KeyCode::Char('d') | KeyCode::Delete if !calendar => Some(Action::RemoveRecord),
            KeyCode::Char('r') if plain => Some(Action::Refresh),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::PrevMonth => {
                let request = self.state.binder.prev();
                self.after_navigation(request);
            }
            Action::NextMonth => {
                let request = self.state.binder.next();
                self.after_navigation(request);
            }
            Action::MoveDay(delta) => self.state.move_day(delta),
            Action::MoveRow(delta) => self.state.move_row(delta),
            Action::ToggleFocus => self.state.toggle_focus(),
            Action::SetWeight => self.handle_set_weight(),
            Action::RemoveRecord => self.handle_remove_record(),
            Action::Refresh => self.reload(),
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        match self.state.overlay() {
            Some(OverlayState::Prompt(_)) => {
                match key.code {
                    KeyCode::Esc => self.state.answer_prompt(false),
                    KeyCode::Enter => self.state.answer_prompt(true),
                    KeyCode::Backspace => {
                        if let Some(prompt) = self.state.prompt_overlay_mut() {
                            prompt.pop_grapheme();
                        }
                    }
                    KeyCode::Char(ch)
                        if !key.modifiers.intersects(
                            KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                        ) =>
                    {
                        if let Some(prompt) = self.state.prompt_overlay_mut() {
                            prompt.push_char(ch);
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::Confirm(_)) => {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                        self.state.answer_confirm(true)
                    }
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                        self.state.answer_confirm(false)
                    }
                    _ => {}
                }
                true
            }
            None => false,
        }
    }

    /// Re-renders the calendar and the summary for the current month.
    pub fn reload(&mut self) {
        let request = self.state.binder.begin_render();
        self.spawn_month_fetch(request);
        self.spawn_summary_fetch();
    }

    fn after_navigation(&mut self, request: MonthRequest) {
        self.state.select_default_day();
        self.state.selected_row = 0;
        self.spawn_month_fetch(request);
        self.spawn_summary_fetch();
    }

    fn spawn_month_fetch(&self, request: MonthRequest) {
        let store = Arc::clone(self.state.binder.store());
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = request.load(store.as_ref()).await;
            let _ = tx.send(AppEvent::MonthLoaded { request, result });
        });
    }

    fn spawn_summary_fetch(&mut self) {
        let request = self.state.summary.begin_refresh(self.state.binder.month());
        let store = Arc::clone(self.state.summary.store());
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let result = request.load(store.as_ref()).await;
            let _ = tx.send(AppEvent::SummaryLoaded { request, result });
        });
    }

    fn handle_set_weight(&mut self) {
        let Some(date_key) = self.state.selected_cell().map(|cell| cell.date_key.clone()) else {
            return;
        };
        let ticket = match self.state.binder.begin_entry(&date_key) {
            Ok(ticket) => ticket,
            Err(BinderError::EntryInProgress) => {
                self.state
                    .set_status_message(Some("Finish the current entry first"));
                return;
            }
            Err(err) => {
                tracing::warn!(?err, "cannot start weight entry");
                return;
            }
        };

        let store = Arc::clone(self.state.binder.store());
        let mode = self.state.binder.entry_mode();
        let dialog = self.dialog.clone();
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let committing = tx.clone();
            let pending = ticket.clone();
            let outcome = run_entry(store.as_ref(), mode, &dialog, &ticket, move |weight| {
                let _ = committing.send(AppEvent::EntryCommitting {
                    ticket: pending,
                    weight,
                });
            })
            .await;
            let _ = tx.send(AppEvent::EntryFinished { ticket, outcome });
        });
    }

    fn handle_remove_record(&mut self) {
        let Some(record) = self.state.selected_record().cloned() else {
            return;
        };
        let store = Arc::clone(self.state.summary.store());
        let dialog = self.dialog.clone();
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let outcome = confirm_removal(store.as_ref(), &dialog, &record).await;
            let _ = tx.send(AppEvent::RemovalFinished { outcome });
        });
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::MonthLoaded { request, result } => {
                let unavailable = match &result {
                    Err(err @ StoreError::StorageUnavailable { .. }) => Some(err.to_string()),
                    _ => None,
                };
                if self.state.binder.finish_render(request, result) == RenderStatus::Applied {
                    match unavailable {
                        Some(message) => self.state.show_persistent_notice(message),
                        None => self.state.clear_persistent_notice(),
                    }
                }
            }
            AppEvent::SummaryLoaded { request, result } => {
                if self.state.summary.finish_refresh(request, result) {
                    self.state.clamp_row();
                }
            }
            AppEvent::EntryCommitting { ticket, weight } => {
                self.state.binder.mark_committing(&ticket, weight);
            }
            AppEvent::EntryFinished { ticket, outcome } => {
                self.state.binder.finish_entry(&ticket, &outcome);
                if let EntryOutcome::Saved(record) = &outcome {
                    self.state.set_status_message(Some(format!(
                        "Saved {} kg for {}",
                        crate::storage::display_weight(record.weight),
                        record.date
                    )));
                    if ticket.month == self.state.binder.month() {
                        self.spawn_summary_fetch();
                    }
                }
            }
            AppEvent::RemovalFinished { outcome } => match outcome {
                RemovalOutcome::Removed(id) => {
                    self.state.summary.apply_removal(id);
                    self.state.clamp_row();
                    self.state.set_status_message(Some("Record removed"));
                    let request = self.state.binder.begin_render();
                    self.spawn_month_fetch(request);
                }
                RemovalOutcome::Kept => self.state.set_status_message(None::<String>),
                RemovalOutcome::Failed(message) => {
                    tracing::warn!(%message, "record removal failed");
                }
            },
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
