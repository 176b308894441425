use std::sync::Arc;

use crate::calendar::YearMonth;
use crate::dialog::Dialog;
use crate::storage::{DeleteOutcome, RecordStore, StoreResult, WeightRecord};

pub const EMPTY_MESSAGE: &str = "No weight records for this month.";
pub const ERROR_MESSAGE: &str = "Error loading weight records.";
pub const CONFIRM_REMOVE: &str = "Are you sure about that?";

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryView {
    Loading,
    Empty,
    Rows(Vec<WeightRecord>),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryRequest {
    pub month: YearMonth,
    pub generation: u64,
}

impl SummaryRequest {
    pub async fn load<S>(self, store: &S) -> StoreResult<Vec<WeightRecord>>
    where
        S: RecordStore + ?Sized,
    {
        store.init().await?;
        store.get_by_month(self.month).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    Removed(i64),
    Kept,
    Failed(String),
}

/// The sorted list of records under the calendar for the active month.
pub struct MonthlySummary<S: ?Sized> {
    store: Arc<S>,
    month: YearMonth,
    generation: u64,
    view: SummaryView,
}

impl<S> MonthlySummary<S>
where
    S: RecordStore + ?Sized,
{
    pub fn new(store: Arc<S>, month: YearMonth) -> Self {
        Self {
            store,
            month,
            generation: 0,
            view: SummaryView::Loading,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn month(&self) -> YearMonth {
        self.month
    }

    pub fn view(&self) -> &SummaryView {
        &self.view
    }

    pub fn rows(&self) -> &[WeightRecord] {
        match &self.view {
            SummaryView::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn begin_refresh(&mut self, month: YearMonth) -> SummaryRequest {
        self.generation += 1;
        self.month = month;
        self.view = SummaryView::Loading;
        SummaryRequest {
            month,
            generation: self.generation,
        }
    }

    /// Returns `false` when the response was superseded by a newer refresh.
    pub fn finish_refresh(
        &mut self,
        request: SummaryRequest,
        result: StoreResult<Vec<WeightRecord>>,
    ) -> bool {
        if request.generation != self.generation || request.month != self.month {
            tracing::debug!(month = %request.month, "discarding stale summary response");
            return false;
        }
        self.view = match result {
            Ok(records) if records.is_empty() => SummaryView::Empty,
            Ok(mut records) => {
                records.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
                SummaryView::Rows(records)
            }
            Err(err) => {
                tracing::warn!(?err, month = %request.month, "summary fetch failed");
                SummaryView::Failed
            }
        };
        true
    }

    pub async fn refresh(&mut self, month: YearMonth) -> bool {
        let request = self.begin_refresh(month);
        let result = request.load(self.store.as_ref()).await;
        self.finish_refresh(request, result)
    }

    pub fn lines(&self) -> Vec<String> {
        match &self.view {
            SummaryView::Loading => Vec::new(),
            SummaryView::Empty => vec![EMPTY_MESSAGE.to_string()],
            SummaryView::Failed => vec![ERROR_MESSAGE.to_string()],
            SummaryView::Rows(rows) => rows.iter().map(WeightRecord::summary_line).collect(),
        }
    }

    /// Drops a removed row without re-fetching the month.
    pub fn apply_removal(&mut self, id: i64) {
        if let SummaryView::Rows(rows) = &mut self.view {
            rows.retain(|record| record.id != id);
            if rows.is_empty() {
                self.view = SummaryView::Empty;
            }
        }
    }

    pub async fn remove(&mut self, record: &WeightRecord, dialog: &dyn Dialog) -> RemovalOutcome {
        let outcome = confirm_removal(self.store.as_ref(), dialog, record).await;
        if let RemovalOutcome::Removed(id) = outcome {
            self.apply_removal(id);
        }
        outcome
    }
}

/// Re-checks the store, asks for confirmation and deletes on "yes".
pub async fn confirm_removal<S>(store: &S, dialog: &dyn Dialog, record: &WeightRecord) -> RemovalOutcome
where
    S: RecordStore + ?Sized,
{
    if let Err(err) = store.init().await {
        tracing::error!(?err, "store unavailable before removal");
        let message = format!("Could not remove record: {err}");
        dialog.notify(&message).await;
        return RemovalOutcome::Failed(message);
    }
    if !dialog.ask_confirm(CONFIRM_REMOVE).await {
        return RemovalOutcome::Kept;
    }
    match store.delete_by_id(record.id).await {
        Ok(DeleteOutcome::Deleted) => RemovalOutcome::Removed(record.id),
        Ok(DeleteOutcome::NotFound) => {
            tracing::debug!(id = record.id, "record already gone");
            RemovalOutcome::Removed(record.id)
        }
        Err(err) => {
            tracing::error!(?err, id = record.id, "failed to remove record");
            let message = format!("Could not remove record: {err}");
            dialog.notify(&message).await;
            RemovalOutcome::Failed(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::testing::ScriptedDialog;
    use crate::storage::MemoryStore;

    fn month(year: i32, index: u8) -> YearMonth {
        YearMonth::from_index(year, index).expect("valid month")
    }

    async fn store_with(records: &[(&str, f64)]) -> anyhow::Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        store.init().await?;
        for (date, weight) in records {
            store.insert(date, *weight).await?;
        }
        Ok(store)
    }

    #[tokio::test]
    async fn rows_are_sorted_by_date_then_id() -> anyhow::Result<()> {
        let store = store_with(&[
            ("2025-03-20", 69.9),
            ("2025-03-05", 70.2),
            ("2025-03-05", 70.5),
            ("2025-02-28", 71.0),
        ])
        .await?;
        let mut summary = MonthlySummary::new(store, month(2025, 2));
        assert!(summary.refresh(month(2025, 2)).await);

        assert_eq!(
            summary.lines(),
            vec![
                "2025-03-05 | 70.2 kg",
                "2025-03-05 | 70.5 kg",
                "2025-03-20 | 69.9 kg",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_month_shows_fixed_message() -> anyhow::Result<()> {
        let store = store_with(&[]).await?;
        let mut summary = MonthlySummary::new(store, month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        assert_eq!(summary.view(), &SummaryView::Empty);
        assert_eq!(summary.lines(), vec![EMPTY_MESSAGE]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_shows_error_message() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2)]).await?;
        store.set_unavailable(true);
        let mut summary = MonthlySummary::new(store, month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        assert_eq!(summary.lines(), vec![ERROR_MESSAGE]);
        Ok(())
    }

    #[tokio::test]
    async fn older_refresh_cannot_overwrite_newer_month() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2)]).await?;
        let mut summary = MonthlySummary::new(store.clone(), month(2025, 2));

        let march = summary.begin_refresh(month(2025, 2));
        let april = summary.begin_refresh(month(2025, 3));
        let late = march.load(store.as_ref()).await;
        assert!(!summary.finish_refresh(march, late));
        assert_eq!(summary.view(), &SummaryView::Loading);

        let fresh = april.load(store.as_ref()).await;
        assert!(summary.finish_refresh(april, fresh));
        assert_eq!(summary.view(), &SummaryView::Empty);
        Ok(())
    }

    #[tokio::test]
    async fn confirmed_removal_deletes_and_drops_the_row() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2), ("2025-03-06", 70.0)]).await?;
        let mut summary = MonthlySummary::new(store.clone(), month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        let target = summary.rows()[0].clone();

        let dialog = ScriptedDialog::confirming(true);
        assert_eq!(
            summary.remove(&target, &dialog).await,
            RemovalOutcome::Removed(target.id)
        );
        assert_eq!(dialog.prompts(), vec![CONFIRM_REMOVE]);
        assert_eq!(summary.lines(), vec!["2025-03-06 | 70 kg"]);
        assert!(store.get_by_date("2025-03-05").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn declined_removal_keeps_everything() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2)]).await?;
        let mut summary = MonthlySummary::new(store.clone(), month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        let target = summary.rows()[0].clone();

        let outcome = summary.remove(&target, &ScriptedDialog::confirming(false)).await;
        assert_eq!(outcome, RemovalOutcome::Kept);
        assert_eq!(summary.rows().len(), 1);
        assert_eq!(store.get_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn removing_last_row_switches_to_empty_message() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2)]).await?;
        let mut summary = MonthlySummary::new(store, month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        let target = summary.rows()[0].clone();

        summary.remove(&target, &ScriptedDialog::confirming(true)).await;
        assert_eq!(summary.lines(), vec![EMPTY_MESSAGE]);
        Ok(())
    }

    #[tokio::test]
    async fn removal_on_unavailable_store_notifies() -> anyhow::Result<()> {
        let store = store_with(&[("2025-03-05", 70.2)]).await?;
        let mut summary = MonthlySummary::new(store.clone(), month(2025, 2));
        summary.refresh(month(2025, 2)).await;
        let target = summary.rows()[0].clone();
        store.set_unavailable(true);

        let dialog = ScriptedDialog::confirming(true);
        let outcome = summary.remove(&target, &dialog).await;
        assert!(matches!(outcome, RemovalOutcome::Failed(_)));
        assert!(dialog.prompts().is_empty());
        assert_eq!(dialog.notices().len(), 1);
        assert_eq!(summary.rows().len(), 1);
        Ok(())
    }
}
