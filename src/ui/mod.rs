use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, FocusPane, OverlayState};
use crate::binder::{CellWeight, DayCell, EntryState, MonthView, ViewStatus};
use crate::storage::RecordStore;
use crate::summary::SummaryView;

const CELL_WIDTH: usize = 9;

pub fn draw_app<S>(frame: &mut Frame, state: &AppState<S>)
where
    S: RecordStore + ?Sized,
{
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(10), Constraint::Length(4)])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(vertical[0]);

    draw_calendar(frame, columns[0], state);
    draw_summary(frame, columns[1], state);

    let status = Paragraph::new(build_status_line(state))
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(Wrap { trim: true });
    frame.render_widget(status, vertical[1]);

    render_notice(frame, state);
    render_overlay(frame, state);
}

fn pane_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn draw_calendar<S>(frame: &mut Frame, area: Rect, state: &AppState<S>)
where
    S: RecordStore + ?Sized,
{
    let view = state.binder.view();
    let focused = state.focus == FocusPane::Calendar;
    let selected = state.selected_cell().map(|cell| cell.date_key.as_str());

    let mut lines = vec![
        Line::from(vec![
            Span::styled("◀ p  ", Style::default().fg(Color::Gray)),
            Span::styled(
                view.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled("  n ▶", Style::default().fg(Color::Gray)),
        ])
        .alignment(Alignment::Center),
        Line::from(""),
        Line::from(
            MonthView::header()
                .into_iter()
                .map(|label| {
                    Span::styled(
                        fit_width(label, CELL_WIDTH),
                        Style::default().add_modifier(Modifier::UNDERLINED),
                    )
                })
                .collect::<Vec<_>>(),
        ),
    ];

    for week in calendar_rows(view) {
        let mut numbers = Vec::with_capacity(7);
        let mut weights = Vec::with_capacity(7);
        for slot in week {
            match slot {
                Some(cell) => {
                    let style = cell_style(cell, focused && selected == Some(cell.date_key.as_str()));
                    numbers.push(Span::styled(fit_width(&cell.day.to_string(), CELL_WIDTH), style));
                    weights.push(Span::styled(fit_width(&cell.displayed(), CELL_WIDTH), style));
                }
                None => {
                    numbers.push(Span::raw(" ".repeat(CELL_WIDTH)));
                    weights.push(Span::raw(" ".repeat(CELL_WIDTH)));
                }
            }
        }
        lines.push(Line::from(numbers));
        lines.push(Line::from(weights));
        lines.push(Line::from(""));
    }

    if let ViewStatus::Failed(reason) = &view.status {
        lines.push(Line::from(Span::styled(
            format!("Could not load this month: {reason}"),
            Style::default().fg(Color::Red),
        )));
    }

    let calendar = Paragraph::new(lines).block(
        Block::default()
            .title("Calendar")
            .borders(Borders::ALL)
            .border_style(pane_style(focused)),
    );
    frame.render_widget(calendar, area);
}

/// Splits the month into Monday-first weeks, with `None` for leading and trailing blanks.
fn calendar_rows(view: &MonthView) -> Vec<Vec<Option<&DayCell>>> {
    let mut slots: Vec<Option<&DayCell>> = vec![None; usize::from(view.weekday_offset)];
    slots.extend(view.cells.values().map(Some));
    while slots.len() % 7 != 0 {
        slots.push(None);
    }
    slots.chunks(7).map(<[_]>::to_vec).collect()
}

fn cell_style(cell: &DayCell, selected: bool) -> Style {
    let mut style = match cell.weight {
        CellWeight::Loading => Style::default().fg(Color::DarkGray),
        CellWeight::Empty => Style::default().fg(Color::Gray),
        CellWeight::Recorded { .. } => Style::default().fg(Color::Green),
    };
    if cell.is_today {
        style = style.fg(Color::Yellow).add_modifier(Modifier::BOLD);
    }
    if selected {
        style = style
            .bg(Color::Blue)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD);
    }
    style
}

fn draw_summary<S>(frame: &mut Frame, area: Rect, state: &AppState<S>)
where
    S: RecordStore + ?Sized,
{
    let focused = state.focus == FocusPane::Summary;
    let message_style = match state.summary.view() {
        SummaryView::Failed => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::Gray),
    };
    let mut items: Vec<ListItem> = match state.summary.view() {
        SummaryView::Rows(_) => state
            .summary
            .lines()
            .into_iter()
            .map(ListItem::new)
            .collect(),
        _ => state
            .summary
            .lines()
            .into_iter()
            .map(|line| ListItem::new(line).style(message_style))
            .collect(),
    };
    if items.is_empty() {
        items.push(ListItem::new("Loading…").style(message_style));
    }

    let mut list_state = ListState::default();
    if focused && !state.summary.rows().is_empty() {
        list_state.select(Some(state.selected_row));
    }

    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("Records · {}", state.summary.month()))
                .borders(Borders::ALL)
                .border_style(pane_style(focused)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn build_status_line<S>(state: &AppState<S>) -> Text<'static>
where
    S: RecordStore + ?Sized,
{
    let entry = match state.binder.entry_state() {
        EntryState::Idle => "idle".to_string(),
        EntryState::Prompting { date } => format!("waiting for {date}"),
        EntryState::Committing { date, .. } => format!("saving {date}"),
    };
    let focus = match state.focus {
        FocusPane::Calendar => "Calendar",
        FocusPane::Summary => "Records",
    };

    let mut spans = vec![
        Span::raw("Month: "),
        Span::styled(
            state.binder.month().to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | Focus: "),
        Span::styled(focus, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" | Entry: "),
        Span::styled(entry, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(" | Mode: {}", state.binder.entry_mode())),
    ];
    if let Some(message) = &state.status_message {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.clone(),
            Style::default().fg(Color::Yellow),
        ));
    }

    let hints = match state.focus {
        FocusPane::Calendar => "h/j/k/l move • Enter set weight • p/n month • Tab records • r reload • q quit",
        FocusPane::Summary => "j/k select • d remove • p/n month • Tab calendar • r reload • q quit",
    };
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(hints, Style::default().fg(Color::Gray))),
    ])
}

fn render_notice<S>(frame: &mut Frame, state: &AppState<S>)
where
    S: RecordStore + ?Sized,
{
    let Some(notice) = state.notice() else {
        return;
    };
    let persistent = notice.expires_at.is_none();
    let size = frame.size();
    let width = (notice.message.width() as u16 + 4).clamp(20, size.width.max(20));
    let area = Rect {
        x: size.x + size.width.saturating_sub(width) / 2,
        y: size.y + 1,
        width: width.min(size.width),
        height: 3.min(size.height),
    };
    let color = if persistent { Color::Red } else { Color::Yellow };
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(notice.message.clone())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color)),
            ),
        area,
    );
}

fn render_overlay<S>(frame: &mut Frame, state: &AppState<S>)
where
    S: RecordStore + ?Sized,
{
    match state.overlay() {
        Some(OverlayState::Prompt(prompt)) => {
            let area = centered_rect(50, 30, frame.size());
            frame.render_widget(Clear, area);
            let mut input = prompt.input.clone();
            input.push('▌');
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    prompt.prompt.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(input),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter to save • Esc to cancel",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title("Weight")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::Confirm(confirm)) => {
            let area = centered_rect(50, 25, frame.size());
            frame.render_widget(Clear, area);
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    confirm.prompt.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "y/Enter to confirm • n/Esc to cancel",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title("Remove record")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        None => {}
    }
}

/// Truncates on grapheme boundaries and pads with spaces to exactly `width` columns.
fn fit_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let w = grapheme.width();
        if used + w > width {
            break;
        }
        out.push_str(grapheme);
        used += w;
    }
    out.push_str(&" ".repeat(width - used));
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
