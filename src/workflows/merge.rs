// ==============================================================================
// workflows/merge.rs - Plain Load-Buffer Merge
// ==============================================================================
// Description: Chunked merge of <base>_load into <base>
// Author: Matt Barham
// Created: 2026-02-18
// Modified: 2026-03-02
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use tracing::info;

use crate::config::MergeSettings;
use crate::discovery::Discovery;
use crate::merge::{ChunkedMerge, MergeReport};
use crate::models::ArrayLayout;
use crate::query::client::QueryExecutor;
use crate::workflows::RunState;

pub struct MergeWorkflow<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    layout: ArrayLayout,
    settings: MergeSettings,
}

impl<'a, E: QueryExecutor + ?Sized> MergeWorkflow<'a, E> {
    pub fn new(executor: &'a E, layout: ArrayLayout, settings: MergeSettings) -> Self {
        Self {
            executor,
            layout,
            settings,
        }
    }

    pub async fn run(&self, state: &mut RunState) -> Result<MergeReport> {
        let source = self.layout.load();
        let target = self.layout.base().clone();

        let discovery = Discovery::new(self.executor);
        for name in [&source, &target] {
            if !discovery.exists(name).await? {
                anyhow::bail!("{} does not exist", name);
            }
        }

        info!("Merging {} into {}", source, target);
        ChunkedMerge::new(self.executor, source, target, self.settings)
            .run(&mut state.checkpoints, &state.journal)
            .await
            .context("Chunked merge failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::afl::ArrayName;
    use crate::query::record::RecordSet;
    use crate::testing::FakeStore;

    fn layout() -> ArrayLayout {
        ArrayLayout::new(ArrayName::new("study").unwrap())
    }

    fn store(present: &'static [&'static str]) -> FakeStore {
        FakeStore::new(move |q| {
            let text = q.to_string();
            if text.starts_with("filter(list('arrays')") {
                let found: Vec<&str> = present
                    .iter()
                    .copied()
                    .filter(|n| text.contains(&format!("name='{}'", n)))
                    .collect();
                return Ok(RecordSet::column("name", found));
            }
            match text.as_str() {
                "count(study_load)" => Ok(RecordSet::column("count", ["30"])),
                "count(between(study_load,0,9))"
                | "count(between(study_load,10,19))"
                | "count(between(study_load,20,29))" => Ok(RecordSet::column("count", ["10"])),
                _ => Ok(RecordSet::column("count", ["0"])),
            }
        })
    }

    #[tokio::test]
    async fn test_merges_load_into_base() {
        let store = store(&["study", "study_load"]);
        let mut state = RunState::in_memory().unwrap();
        let settings = MergeSettings {
            window_size: 10,
            begin: None,
            prune_every: 0,
        };

        let report = MergeWorkflow::new(&store, layout(), settings)
            .run(&mut state)
            .await
            .unwrap();

        assert_eq!(report.windows, 3);
        assert_eq!(report.rows_merged, 30);
        assert_eq!(
            store.mutations()[0],
            "insert(redimension(between(study_load,0,9),study),study)"
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_merging() {
        let store = store(&["study"]);
        let mut state = RunState::in_memory().unwrap();

        let err = MergeWorkflow::new(&store, layout(), MergeSettings::default())
            .run(&mut state)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("study_load does not exist"));
        assert!(store.mutations().is_empty());
    }
}
