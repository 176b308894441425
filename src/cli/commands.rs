use std::fmt::Write as _;
use std::io::{self, Read, Write as _};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use tokio::runtime::Runtime;

use crate::app::App;
use crate::binder::{commit_weight, parse_weight, CalendarBinder, EntryTicket, MonthView, ViewStatus};
use crate::calendar::{parse_date_key, CalendarCursor, YearMonth};
use crate::config::{AppConfig, EntryMode};
use crate::dialog::Dialog;
use crate::storage::{RecordStore, SqliteStore, WeightRecord};
use crate::summary::{confirm_removal, MonthlySummary, RemovalOutcome, SummaryView, ERROR_MESSAGE};

const COLUMN_WIDTH: usize = 7;

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Day to record, as YYYY-MM-DD
    pub date: String,
    /// Weight in kg. Read from piped stdin or prompted when omitted.
    pub weight: Option<String>,
    /// Override the configured entry mode for this write
    #[arg(long)]
    pub mode: Option<EntryMode>,
}

#[derive(Args, Debug, Clone)]
pub struct CalendarArgs {
    /// Month to show, as YYYY-MM (defaults to the current month)
    pub month: Option<YearMonth>,
}

#[derive(Args, Debug, Clone)]
pub struct SummaryArgs {
    /// Month to list, as YYYY-MM (defaults to the current month)
    pub month: Option<YearMonth>,
    /// Print the records as a JSON array
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Record identifier, as shown by `summary --json`
    pub id: i64,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Required; clearing cannot be undone
    #[arg(long)]
    pub yes: bool,
}

pub fn run_tui(config: Arc<AppConfig>, store: Arc<SqliteStore>, runtime: &Runtime) -> Result<()> {
    let mut app = App::new(config, Arc::clone(&store), runtime.handle().clone());
    let result = app.run();
    if store.is_initialized() {
        match runtime.block_on(store.checkpoint()) {
            Ok(stats) => tracing::info!(
                wal_frames = stats.wal_frames,
                checkpointed = stats.checkpointed_frames,
                "checkpointed weight database on exit"
            ),
            Err(err) => tracing::warn!(?err, "wal checkpoint on exit failed"),
        }
    }
    result
}

pub async fn add_weight<S>(config: &AppConfig, store: &S, args: AddArgs) -> Result<()>
where
    S: RecordStore + ?Sized,
{
    let raw = match args.weight.clone() {
        Some(weight) => weight,
        None => match read_stdin()? {
            Some(piped) => piped.lines().next().unwrap_or_default().to_string(),
            None => prompt(&format!("Weight (kg) for {}", args.date))?,
        },
    };
    let record = record_weight(config, store, &args, &raw).await?;
    println!("Saved #{}: {}", record.id, record.summary_line());
    Ok(())
}

async fn record_weight<S>(
    config: &AppConfig,
    store: &S,
    args: &AddArgs,
    raw_weight: &str,
) -> Result<WeightRecord>
where
    S: RecordStore + ?Sized,
{
    let date = parse_date_key(args.date.trim()).context("parsing date")?;
    let Some(weight) = parse_weight(raw_weight) else {
        bail!("Invalid input! '{}' is not a weight in kg", raw_weight.trim());
    };
    let ticket = EntryTicket {
        month: YearMonth::containing(date),
        date_key: args.date.trim().to_string(),
    };
    let mode = args.mode.unwrap_or(config.entry_mode);
    let record = commit_weight(store, mode, &ticket, weight)
        .await
        .with_context(|| format!("saving weight for {}", ticket.date_key))?;
    tracing::info!(id = record.id, date = %record.date, %mode, "recorded weight");
    Ok(record)
}

pub async fn show_calendar<S>(config: &AppConfig, store: Arc<S>, args: CalendarArgs) -> Result<()>
where
    S: RecordStore + ?Sized,
{
    let month = args.month.unwrap_or_else(YearMonth::current);
    let mut binder = CalendarBinder::new(store, CalendarCursor::new(month), config.entry_mode);
    binder.render().await;
    if let ViewStatus::Failed(reason) = &binder.view().status {
        bail!("loading {month}: {reason}");
    }
    println!("{}", format_month_grid(binder.view()));
    Ok(())
}

/// Plain-text month grid: title, Monday-first header, then a day row and a weight row per week.
/// Today's day number carries a `*`.
pub fn format_month_grid(view: &MonthView) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", view.title);
    out.push('\n');
    push_row(&mut out, MonthView::header().into_iter().map(str::to_string));

    let blanks = usize::from(view.weekday_offset);
    let cells: Vec<_> = view.cells.values().collect();
    let mut start = 0;
    let mut leading = blanks;
    while start < cells.len() {
        let take = (7 - leading).min(cells.len() - start);
        let week = &cells[start..start + take];
        let pad = std::iter::repeat(String::new()).take(leading);
        push_row(
            &mut out,
            pad.clone().chain(week.iter().map(|cell| {
                if cell.is_today {
                    format!("{}*", cell.day)
                } else {
                    cell.day.to_string()
                }
            })),
        );
        push_row(&mut out, pad.chain(week.iter().map(|cell| cell.displayed())));
        start += take;
        leading = 0;
    }
    out.trim_end().to_string()
}

fn push_row(out: &mut String, columns: impl Iterator<Item = String>) {
    let mut line = String::new();
    for column in columns {
        let _ = write!(&mut line, "{:<width$}", column, width = COLUMN_WIDTH);
    }
    let _ = writeln!(out, "{}", line.trim_end());
}

pub async fn show_summary<S>(store: Arc<S>, args: SummaryArgs) -> Result<()>
where
    S: RecordStore + ?Sized,
{
    let month = args.month.unwrap_or_else(YearMonth::current);
    let mut summary = MonthlySummary::new(store, month);
    summary.refresh(month).await;
    print!("{}", render_summary(&summary, args.json)?);
    Ok(())
}

fn render_summary<S>(summary: &MonthlySummary<S>, json: bool) -> Result<String>
where
    S: RecordStore + ?Sized,
{
    if matches!(summary.view(), SummaryView::Failed) {
        bail!("{ERROR_MESSAGE}");
    }
    if json {
        let mut out =
            serde_json::to_string_pretty(summary.rows()).context("serializing records as json")?;
        out.push('\n');
        return Ok(out);
    }
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", summary.month());
    for line in summary.lines() {
        let _ = writeln!(&mut out, "{line}");
    }
    Ok(out)
}

pub async fn remove_record<S>(store: &S, args: RemoveArgs) -> Result<()>
where
    S: RecordStore + ?Sized,
{
    let dialog = StdioDialog {
        assume_yes: args.yes,
    };
    println!("{}", remove_by_id(store, &dialog, args.id).await?);
    Ok(())
}

async fn remove_by_id<S>(store: &S, dialog: &dyn Dialog, id: i64) -> Result<String>
where
    S: RecordStore + ?Sized,
{
    store.init().await.context("opening weight log")?;
    let records = store.get_all().await.context("looking up record")?;
    let Some(record) = records.into_iter().find(|record| record.id == id) else {
        return Ok(format!("No weight record with id {id}."));
    };
    println!("{}", record.summary_line());
    match confirm_removal(store, dialog, &record).await {
        RemovalOutcome::Removed(id) => Ok(format!("Removed record #{id}.")),
        RemovalOutcome::Kept => Ok("Kept record.".to_string()),
        RemovalOutcome::Failed(message) => bail!(message),
    }
}

pub async fn clear_records<S>(store: &S, args: ClearArgs) -> Result<()>
where
    S: RecordStore + ?Sized,
{
    println!("{}", clear_all(store, args.yes).await?);
    Ok(())
}

async fn clear_all<S>(store: &S, confirmed: bool) -> Result<String>
where
    S: RecordStore + ?Sized,
{
    if !confirmed {
        bail!("refusing to clear every weight record without --yes");
    }
    store.init().await.context("opening weight log")?;
    let cleared = store.clear_all().await.context("clearing weight records")?;
    Ok(format!("Cleared {cleared} record(s)."))
}

/// Terminal-backed dialog for one-shot commands.
pub struct StdioDialog {
    pub assume_yes: bool,
}

#[async_trait]
impl Dialog for StdioDialog {
    async fn ask_text(&self, label: &str) -> Option<String> {
        prompt(label).ok().filter(|answer| !answer.is_empty())
    }

    async fn ask_confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        if !atty::is(atty::Stream::Stdin) {
            eprintln!("{question} (pass --yes to confirm non-interactively)");
            return false;
        }
        prompt(&format!("{question} [y/N]"))
            .map(|answer| matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }

    async fn notify(&self, message: &str) {
        eprintln!("{message}");
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageOptions;
    use crate::dialog::testing::ScriptedDialog;
    use tempfile::TempDir;
    use time::macros::date;

    type TestResult<T = ()> = Result<T>;

    async fn setup_storage() -> TestResult<(TempDir, Arc<SqliteStore>)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let options = StorageOptions {
            database_path: temp.path().join("data/weights.db"),
            ..StorageOptions::default()
        };
        let store = Arc::new(SqliteStore::from_options(&options));
        store.init().await?;
        Ok((temp, store))
    }

    fn add_args(date: &str) -> AddArgs {
        AddArgs {
            date: date.into(),
            weight: None,
            mode: None,
        }
    }

    #[tokio::test]
    async fn cli_add_upserts_by_default() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let config = AppConfig::default();
        record_weight(&config, store.as_ref(), &add_args("2025-03-05"), "70.2").await?;
        let record =
            record_weight(&config, store.as_ref(), &add_args("2025-03-05"), "69.9 kg").await?;

        let stored = store.get_by_date("2025-03-05").await?;
        assert_eq!(stored, vec![record]);
        Ok(())
    }

    #[tokio::test]
    async fn cli_add_append_mode_keeps_both() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let config = AppConfig {
            entry_mode: EntryMode::Append,
            ..AppConfig::default()
        };
        record_weight(&config, store.as_ref(), &add_args("2025-03-05"), "70.2").await?;
        record_weight(&config, store.as_ref(), &add_args("2025-03-05"), "69.9").await?;
        assert_eq!(store.get_by_date("2025-03-05").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn cli_add_rejects_bad_input_without_writing() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let config = AppConfig::default();

        let err = record_weight(&config, store.as_ref(), &add_args("2025-03-05"), "heavy")
            .await
            .expect_err("non-numeric weight");
        assert!(err.to_string().starts_with("Invalid input!"), "{err:#}");

        let err = record_weight(&config, store.as_ref(), &add_args("2025-02-30"), "70")
            .await
            .expect_err("impossible date");
        assert!(format!("{err:#}").contains("2025-02-30"), "{err:#}");

        assert!(store.get_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cli_calendar_grid_matches_layout() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        store.insert("2021-02-01", 80.5).await?;
        store.insert("2021-02-03", 80.1).await?;
        store.insert("2021-02-03", 79.8).await?;

        let month = YearMonth::from_index(2021, 1).expect("valid month");
        let mut binder = CalendarBinder::new(store, CalendarCursor::new(month), EntryMode::Upsert)
            .with_today(date!(2021 - 02 - 10));
        binder.render().await;

        insta::assert_snapshot!(format_month_grid(binder.view()), @r###"
        February 2021

        Mon    Tue    Wed    Thu    Fri    Sat    Sun
        1      2      3      4      5      6      7
        80.5   -      79.8   -      -      -      -
        8      9      10*    11     12     13     14
        -      -      -      -      -      -      -
        15     16     17     18     19     20     21
        -      -      -      -      -      -      -
        22     23     24     25     26     27     28
        -      -      -      -      -      -      -
        "###);
        Ok(())
    }

    #[tokio::test]
    async fn cli_calendar_pads_leading_days() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let month = YearMonth::from_index(2024, 8).expect("valid month");
        let mut binder = CalendarBinder::new(store, CalendarCursor::new(month), EntryMode::Upsert)
            .with_today(date!(2024 - 01 - 01));
        binder.render().await;

        let grid = format_month_grid(binder.view());
        let first_week = grid.lines().nth(3).expect("first week row");
        assert_eq!(first_week, format!("{}1", " ".repeat(6 * COLUMN_WIDTH)));
        assert!(grid.lines().any(|line| line == "30"));
        Ok(())
    }

    #[tokio::test]
    async fn cli_summary_lists_sorted_rows_and_json() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        store.insert("2025-03-20", 69.9).await?;
        store.insert("2025-03-05", 70.2).await?;
        let month = YearMonth::from_index(2025, 2).expect("valid month");
        let mut summary = MonthlySummary::new(Arc::clone(&store), month);
        summary.refresh(month).await;

        let text = render_summary(&summary, false)?;
        assert_eq!(
            text,
            "March 2025\n2025-03-05 | 70.2 kg\n2025-03-20 | 69.9 kg\n"
        );

        let json: serde_json::Value = serde_json::from_str(&render_summary(&summary, true)?)?;
        assert_eq!(json[0]["date"], "2025-03-05");
        assert_eq!(json[0]["weight"], 70.2);
        assert_eq!(json.as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn cli_summary_empty_month_prints_message() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let month = YearMonth::from_index(2025, 2).expect("valid month");
        let mut summary = MonthlySummary::new(store, month);
        summary.refresh(month).await;
        assert_eq!(
            render_summary(&summary, false)?,
            "March 2025\nNo weight records for this month.\n"
        );
        assert_eq!(render_summary(&summary, true)?, "[]\n");
        Ok(())
    }

    #[tokio::test]
    async fn cli_remove_confirms_then_deletes() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        let id = store.insert("2025-03-05", 70.2).await?;

        let declined = remove_by_id(store.as_ref(), &ScriptedDialog::confirming(false), id).await?;
        assert_eq!(declined, "Kept record.");
        assert_eq!(store.get_all().await?.len(), 1);

        let removed = remove_by_id(store.as_ref(), &ScriptedDialog::confirming(true), id).await?;
        assert_eq!(removed, format!("Removed record #{id}."));
        assert!(store.get_all().await?.is_empty());

        let missing = remove_by_id(store.as_ref(), &ScriptedDialog::confirming(true), id).await?;
        assert_eq!(missing, format!("No weight record with id {id}."));
        Ok(())
    }

    #[tokio::test]
    async fn cli_clear_requires_yes() -> TestResult {
        let (_temp, store) = setup_storage().await?;
        store.insert("2025-03-05", 70.2).await?;
        store.insert("2025-04-05", 69.2).await?;

        assert!(clear_all(store.as_ref(), false).await.is_err());
        assert_eq!(store.get_all().await?.len(), 2);
        assert_eq!(clear_all(store.as_ref(), true).await?, "Cleared 2 record(s).");
        assert!(store.get_all().await?.is_empty());
        Ok(())
    }
}
