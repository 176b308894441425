use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use unicode_segmentation::UnicodeSegmentation;

use crate::binder::{CalendarBinder, DayCell, EntryState};
use crate::dialog::DialogRequest;
use crate::storage::{RecordStore, WeightRecord};
use crate::summary::MonthlySummary;

const MAX_INPUT_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Calendar,
    Summary,
}

#[derive(Debug)]
pub struct PromptOverlay {
    pub prompt: String,
    pub input: String,
    reply: Option<oneshot::Sender<Option<String>>>,
}

impl PromptOverlay {
    pub fn push_char(&mut self, ch: char) {
        if self.input.graphemes(true).count() < MAX_INPUT_LEN {
            self.input.push(ch);
        }
    }

    pub fn pop_grapheme(&mut self) {
        if let Some((idx, _)) = self.input.grapheme_indices(true).next_back() {
            self.input.truncate(idx);
        }
    }
}

#[derive(Debug)]
pub struct ConfirmOverlay {
    pub prompt: String,
    reply: Option<oneshot::Sender<bool>>,
}

#[derive(Debug)]
pub enum OverlayState {
    Prompt(PromptOverlay),
    Confirm(ConfirmOverlay),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    /// `None` keeps the notice until something replaces it.
    pub expires_at: Option<Instant>,
}

pub struct AppState<S: ?Sized> {
    pub focus: FocusPane,
    pub binder: CalendarBinder<S>,
    pub summary: MonthlySummary<S>,
    pub selected_day: usize,
    pub selected_row: usize,
    pub status_message: Option<String>,
    overlay: Option<OverlayState>,
    notice: Option<Notice>,
    queued: VecDeque<DialogRequest>,
}

impl<S> AppState<S>
where
    S: RecordStore + ?Sized,
{
    pub fn new(binder: CalendarBinder<S>, summary: MonthlySummary<S>) -> Self {
        let mut state = Self {
            focus: FocusPane::Calendar,
            binder,
            summary,
            selected_day: 0,
            selected_row: 0,
            status_message: None,
            overlay: None,
            notice: None,
            queued: VecDeque::new(),
        };
        state.select_default_day();
        state
    }

    /// Today when it is in the displayed month, otherwise the first day.
    pub fn select_default_day(&mut self) {
        self.selected_day = self
            .binder
            .view()
            .cells
            .values()
            .position(|cell| cell.is_today)
            .unwrap_or(0);
    }

    pub fn selected_cell(&self) -> Option<&DayCell> {
        self.binder.view().cell_at(self.selected_day)
    }

    pub fn selected_record(&self) -> Option<&WeightRecord> {
        self.summary.rows().get(self.selected_row)
    }

    pub fn move_day(&mut self, delta: isize) {
        let len = self.binder.view().len();
        if len == 0 {
            return;
        }
        let target = self.selected_day as isize + delta;
        self.selected_day = target.clamp(0, len as isize - 1) as usize;
    }

    pub fn move_row(&mut self, delta: isize) {
        let len = self.summary.rows().len();
        if len == 0 {
            self.selected_row = 0;
            return;
        }
        let target = self.selected_row as isize + delta;
        self.selected_row = target.clamp(0, len as isize - 1) as usize;
    }

    pub fn clamp_row(&mut self) {
        self.move_row(0);
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::Calendar => FocusPane::Summary,
            FocusPane::Summary => FocusPane::Calendar,
        };
    }

    pub fn entry_busy(&self) -> bool {
        self.binder.entry_state() != &EntryState::Idle
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn prompt_overlay_mut(&mut self) -> Option<&mut PromptOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::Prompt(prompt)) => Some(prompt),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn set_status_message<M: Into<String>>(&mut self, message: Option<M>) {
        self.status_message = message.map(Into::into);
    }

    pub fn show_notice(&mut self, message: impl Into<String>, ttl: Duration, now: Instant) {
        if self.notice.as_ref().is_some_and(|n| n.expires_at.is_none()) {
            return;
        }
        self.notice = Some(Notice {
            message: message.into(),
            expires_at: Some(now + ttl),
        });
    }

    pub fn show_persistent_notice(&mut self, message: impl Into<String>) {
        self.notice = Some(Notice {
            message: message.into(),
            expires_at: None,
        });
    }

    pub fn clear_persistent_notice(&mut self) {
        if self.notice.as_ref().is_some_and(|n| n.expires_at.is_none()) {
            self.notice = None;
        }
    }

    pub fn expire_notice(&mut self, now: Instant) {
        if let Some(Notice {
            expires_at: Some(deadline),
            ..
        }) = &self.notice
        {
            if now >= *deadline {
                self.notice = None;
            }
        }
    }

    /// Shows a dialog request, or queues it while another overlay is open.
    pub fn accept_dialog(&mut self, request: DialogRequest, notice_ttl: Duration, now: Instant) {
        match request {
            DialogRequest::Notify { message } => self.show_notice(message, notice_ttl, now),
            other if self.overlay.is_some() => self.queued.push_back(other),
            DialogRequest::Text { prompt, reply } => {
                self.overlay = Some(OverlayState::Prompt(PromptOverlay {
                    prompt,
                    input: String::new(),
                    reply: Some(reply),
                }));
            }
            DialogRequest::Confirm { prompt, reply } => {
                self.overlay = Some(OverlayState::Confirm(ConfirmOverlay {
                    prompt,
                    reply: Some(reply),
                }));
            }
        }
    }

    /// Answers the open prompt; `submit == false` cancels it.
    pub fn answer_prompt(&mut self, submit: bool) {
        let Some(OverlayState::Prompt(mut prompt)) = self.overlay.take() else {
            return;
        };
        let answer = submit.then(|| std::mem::take(&mut prompt.input));
        if let Some(reply) = prompt.reply.take() {
            let _ = reply.send(answer);
        }
        self.open_queued();
    }

    pub fn answer_confirm(&mut self, yes: bool) {
        let Some(OverlayState::Confirm(mut confirm)) = self.overlay.take() else {
            return;
        };
        if let Some(reply) = confirm.reply.take() {
            let _ = reply.send(yes);
        }
        self.open_queued();
    }

    /// Drops every open and queued request; waiting tasks see a dismissal.
    pub fn dismiss_all(&mut self) {
        self.overlay = None;
        self.queued.clear();
    }

    fn open_queued(&mut self) {
        if let Some(next) = self.queued.pop_front() {
            self.accept_dialog(next, Duration::ZERO, Instant::now());
        }
    }
}
