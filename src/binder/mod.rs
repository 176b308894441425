use std::sync::Arc;

use indexmap::IndexMap;
use time::Date;

use crate::calendar::{date_key, today_local, CalendarCursor, MonthGrid, WeekdayColumn, YearMonth};
use crate::config::EntryMode;
use crate::dialog::Dialog;
use crate::storage::{display_weight, RecordStore, StoreError, StoreResult, WeightRecord};

pub const PLACEHOLDER: &str = "-";
pub const LOADING: &str = "...";
pub const INVALID_INPUT: &str = "Invalid input!";
pub const WEIGHT_PROMPT: &str = "Input weight (kg):";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinderError {
    #[error("another weight entry is already in progress")]
    EntryInProgress,
    #[error("{0} is not a day of the displayed month")]
    UnknownDay(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellWeight {
    Loading,
    Empty,
    Recorded { id: i64, weight: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayCell {
    pub day: u8,
    pub date_key: String,
    pub weight: CellWeight,
    pub is_today: bool,
}

impl DayCell {
    pub fn displayed(&self) -> String {
        match self.weight {
            CellWeight::Loading => LOADING.to_string(),
            CellWeight::Empty => PLACEHOLDER.to_string(),
            CellWeight::Recorded { weight, .. } => display_weight(weight),
        }
    }

    fn show(&mut self, record: &WeightRecord) {
        let newer = match self.weight {
            CellWeight::Recorded { id, .. } => record.id >= id,
            CellWeight::Loading | CellWeight::Empty => true,
        };
        if newer {
            self.weight = CellWeight::Recorded {
                id: record.id,
                weight: record.weight,
            };
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Everything needed to draw one month: title, leading blanks and one cell per day.
#[derive(Debug, Clone)]
pub struct MonthView {
    pub month: YearMonth,
    pub title: String,
    pub weekday_offset: u8,
    pub cells: IndexMap<String, DayCell>,
    pub status: ViewStatus,
}

impl MonthView {
    fn loading(grid: MonthGrid, today: Date) -> Self {
        let cells = grid
            .days()
            .map(|day| {
                let key = date_key(day);
                let cell = DayCell {
                    day: day.day(),
                    date_key: key.clone(),
                    weight: CellWeight::Loading,
                    is_today: day == today,
                };
                (key, cell)
            })
            .collect();
        Self {
            month: grid.month,
            title: grid.month.to_string(),
            weekday_offset: grid.weekday_offset,
            cells,
            status: ViewStatus::Loading,
        }
    }

    pub fn header() -> Vec<&'static str> {
        WeekdayColumn::labels()
    }

    pub fn cell(&self, date_key: &str) -> Option<&DayCell> {
        self.cells.get(date_key)
    }

    pub fn cell_at(&self, index: usize) -> Option<&DayCell> {
        self.cells.get_index(index).map(|(_, cell)| cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.status == ViewStatus::Loading
    }

    fn apply_records(&mut self, records: &[WeightRecord]) {
        for cell in self.cells.values_mut() {
            cell.weight = CellWeight::Empty;
        }
        for record in records {
            match self.cells.get_mut(&record.date) {
                Some(cell) => cell.show(record),
                None => tracing::debug!(date = %record.date, "record outside displayed month"),
            }
        }
        self.status = ViewStatus::Ready;
    }

    fn apply_failure(&mut self, err: &StoreError) {
        for cell in self.cells.values_mut() {
            cell.weight = CellWeight::Empty;
        }
        self.status = ViewStatus::Failed(err.to_string());
    }
}

/// A month fetch tagged with the render it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRequest {
    pub month: YearMonth,
    pub generation: u64,
}

impl MonthRequest {
    pub async fn load<S>(self, store: &S) -> StoreResult<Vec<WeightRecord>>
    where
        S: RecordStore + ?Sized,
    {
        store.init().await?;
        store.get_by_month(self.month).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Applied,
    /// The response belonged to an older render and was dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Idle,
    Prompting { date: String },
    Committing { date: String, weight: f64 },
}

/// Identifies one set-weight flow; handed out by [`CalendarBinder::begin_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTicket {
    pub month: YearMonth,
    pub date_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryDecision {
    Cancelled,
    Invalid,
    Commit(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Cancelled,
    Rejected,
    Saved(WeightRecord),
    Failed(String),
}

/// Keeps the rendered month in sync with the cursor and the record store.
pub struct CalendarBinder<S: ?Sized> {
    store: Arc<S>,
    cursor: CalendarCursor,
    view: MonthView,
    generation: u64,
    entry: EntryState,
    mode: EntryMode,
    today: Date,
}

impl<S> CalendarBinder<S>
where
    S: RecordStore + ?Sized,
{
    pub fn new(store: Arc<S>, cursor: CalendarCursor, mode: EntryMode) -> Self {
        let today = today_local();
        Self {
            view: MonthView::loading(cursor.grid(), today),
            store,
            cursor,
            generation: 0,
            entry: EntryState::Idle,
            mode,
            today,
        }
    }

    /// Pins "today" instead of reading the clock.
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = today;
        self.view = MonthView::loading(self.cursor.grid(), today);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn month(&self) -> YearMonth {
        self.cursor.current()
    }

    pub fn view(&self) -> &MonthView {
        &self.view
    }

    pub fn entry_state(&self) -> &EntryState {
        &self.entry
    }

    pub fn entry_mode(&self) -> EntryMode {
        self.mode
    }

    /// Clears the view to its loading state and returns the fetch that will fill it.
    pub fn begin_render(&mut self) -> MonthRequest {
        self.generation += 1;
        self.view = MonthView::loading(self.cursor.grid(), self.today);
        MonthRequest {
            month: self.cursor.current(),
            generation: self.generation,
        }
    }

    pub fn finish_render(
        &mut self,
        request: MonthRequest,
        result: StoreResult<Vec<WeightRecord>>,
    ) -> RenderStatus {
        if request.generation != self.generation || request.month != self.view.month {
            tracing::debug!(
                month = %request.month,
                generation = request.generation,
                current = self.generation,
                "discarding stale month response"
            );
            return RenderStatus::Stale;
        }
        match result {
            Ok(records) => self.view.apply_records(&records),
            Err(err) => {
                tracing::warn!(?err, month = %request.month, "month fetch failed");
                self.view.apply_failure(&err);
            }
        }
        RenderStatus::Applied
    }

    pub async fn render(&mut self) -> RenderStatus {
        let request = self.begin_render();
        let result = request.load(self.store.as_ref()).await;
        self.finish_render(request, result)
    }

    pub fn prev(&mut self) -> MonthRequest {
        self.cursor.prev();
        self.begin_render()
    }

    pub fn next(&mut self) -> MonthRequest {
        self.cursor.next();
        self.begin_render()
    }

    pub fn begin_entry(&mut self, date_key: &str) -> Result<EntryTicket, BinderError> {
        if self.entry != EntryState::Idle {
            return Err(BinderError::EntryInProgress);
        }
        if !self.view.cells.contains_key(date_key) {
            return Err(BinderError::UnknownDay(date_key.to_string()));
        }
        self.entry = EntryState::Prompting {
            date: date_key.to_string(),
        };
        Ok(EntryTicket {
            month: self.view.month,
            date_key: date_key.to_string(),
        })
    }

    pub fn mark_committing(&mut self, ticket: &EntryTicket, weight: f64) {
        self.entry = EntryState::Committing {
            date: ticket.date_key.clone(),
            weight,
        };
    }

    /// Ends the flow. A saved record patches its cell only if that month is still displayed.
    pub fn finish_entry(&mut self, ticket: &EntryTicket, outcome: &EntryOutcome) {
        if let EntryOutcome::Saved(record) = outcome {
            if ticket.month != self.view.month {
                tracing::debug!(date = %record.date, "dropping patch for a month no longer shown");
            } else if let Some(cell) = self.view.cells.get_mut(&record.date) {
                if self.mode == EntryMode::Upsert {
                    cell.weight = CellWeight::Empty;
                }
                cell.show(record);
            }
        }
        self.entry = EntryState::Idle;
    }

    /// Prompt, validate, write and patch, in one awaited flow.
    pub async fn set_weight(
        &mut self,
        date_key: &str,
        dialog: &dyn Dialog,
    ) -> Result<EntryOutcome, BinderError> {
        let ticket = self.begin_entry(date_key)?;
        let store = Arc::clone(&self.store);
        let mode = self.mode;
        let outcome = run_entry(store.as_ref(), mode, dialog, &ticket, |weight| {
            self.mark_committing(&ticket, weight)
        })
        .await;
        self.finish_entry(&ticket, &outcome);
        Ok(outcome)
    }
}

/// The asynchronous half of a set-weight flow. `on_commit` fires once the input was accepted
/// and before the write starts.
pub async fn run_entry<S, F>(
    store: &S,
    mode: EntryMode,
    dialog: &dyn Dialog,
    ticket: &EntryTicket,
    on_commit: F,
) -> EntryOutcome
where
    S: RecordStore + ?Sized,
    F: FnOnce(f64),
{
    match prompt_weight(dialog, ticket).await {
        EntryDecision::Cancelled => EntryOutcome::Cancelled,
        EntryDecision::Invalid => EntryOutcome::Rejected,
        EntryDecision::Commit(weight) => {
            on_commit(weight);
            let result = commit_weight(store, mode, ticket, weight).await;
            settle_commit(dialog, result).await
        }
    }
}

pub async fn prompt_weight(dialog: &dyn Dialog, ticket: &EntryTicket) -> EntryDecision {
    let prompt = format!("{WEIGHT_PROMPT} {}", ticket.date_key);
    let Some(input) = dialog.ask_text(&prompt).await else {
        return EntryDecision::Cancelled;
    };
    if input.trim().is_empty() {
        return EntryDecision::Cancelled;
    }
    match parse_weight(&input) {
        Some(weight) => EntryDecision::Commit(weight),
        None => {
            tracing::debug!(input = %input, "rejected weight input");
            dialog.notify(INVALID_INPUT).await;
            EntryDecision::Invalid
        }
    }
}

pub async fn commit_weight<S>(
    store: &S,
    mode: EntryMode,
    ticket: &EntryTicket,
    weight: f64,
) -> StoreResult<WeightRecord>
where
    S: RecordStore + ?Sized,
{
    store.init().await?;
    let id = match mode {
        EntryMode::Upsert => store.upsert(&ticket.date_key, weight).await?,
        EntryMode::Append => store.insert(&ticket.date_key, weight).await?,
    };
    Ok(WeightRecord {
        id,
        date: ticket.date_key.clone(),
        weight,
    })
}

/// Turns a write result into the flow outcome, notifying the user about failures.
pub async fn settle_commit(dialog: &dyn Dialog, result: StoreResult<WeightRecord>) -> EntryOutcome {
    match result {
        Ok(record) => EntryOutcome::Saved(record),
        Err(err) => {
            tracing::error!(?err, "failed to save weight");
            let message = match err {
                StoreError::InvalidArgument(_) => INVALID_INPUT.to_string(),
                other => format!("Could not save weight: {other}"),
            };
            dialog.notify(&message).await;
            EntryOutcome::Failed(message)
        }
    }
}

/// Accepts a plain decimal number, optionally followed by `kg`.
pub fn parse_weight(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    let number = trimmed
        .strip_suffix("kg")
        .or_else(|| trimmed.strip_suffix("KG"))
        .unwrap_or(trimmed)
        .trim_end();
    let weight: f64 = number.parse().ok()?;
    (weight.is_finite() && weight >= 0.0).then_some(weight)
}
