//! Shared driver machinery: incremental dedup, conflict resolution, and
//! canonical ordering.

use std::collections::BTreeMap;

use serde_json::json;

use crate::consistency::{ConflictDetail, SIGNAL_LAST_UPDATE_CONFLICT};
use crate::error::{BojError, BojResult};
use crate::{ConsistencyMode, OutputOrder, TimeSeriesRecord};

pub mod data;
pub mod metadata;

/// Upper bound on the conflict audit sample carried in result meta.
pub const CONFLICT_SAMPLE_LIMIT: usize = 20;

/// Accumulates records incrementally as pages arrive, so memory only ever
/// holds dedup winners. Conflicting LAST_UPDATE values either fail the call
/// (strict) or are resolved latest-wins with page order as the tiebreak.
#[derive(Debug, Default)]
pub struct RecordAccumulator {
    winners: BTreeMap<(String, String), TimeSeriesRecord>,
    conflicts_count: u64,
    conflicts_sample: Vec<ConflictDetail>,
}

impl RecordAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one page's records under the given consistency policy.
    pub fn absorb(
        &mut self,
        records: Vec<TimeSeriesRecord>,
        mode: ConsistencyMode,
    ) -> BojResult<()> {
        for record in records {
            let key = record.dedup_key();
            match self.winners.get(&key) {
                None => {
                    self.winners.insert(key, record);
                }
                Some(existing) => {
                    if existing.last_update != record.last_update {
                        self.conflicts_count += 1;
                        let detail = ConflictDetail {
                            series_code: record.series_code.clone(),
                            survey_date: record.survey_date.clone(),
                            existing_last_update: existing.last_update.clone(),
                            incoming_last_update: record.last_update.clone(),
                        };
                        if self.conflicts_sample.len() < CONFLICT_SAMPLE_LIMIT {
                            self.conflicts_sample.push(detail.clone());
                        }
                        if mode == ConsistencyMode::Strict {
                            return Err(BojError::Consistency {
                                signal: SIGNAL_LAST_UPDATE_CONFLICT.to_string(),
                                details: json!(detail),
                            });
                        }
                    }
                    let incoming_wins = {
                        let winner = choose_record(existing, &record);
                        std::ptr::eq(winner, &record)
                    };
                    if incoming_wins {
                        self.winners.insert(key, record);
                    }
                }
            }
        }
        Ok(())
    }

    /// Total conflicts observed so far.
    pub fn conflicts_count(&self) -> u64 {
        self.conflicts_count
    }

    /// The bounded audit sample.
    pub fn conflicts_sample(&self) -> &[ConflictDetail] {
        &self.conflicts_sample
    }

    /// Finish: drain the winners in canonical order.
    pub fn into_sorted(self, order: OutputOrder) -> Vec<TimeSeriesRecord> {
        let mut records: Vec<TimeSeriesRecord> = self.winners.into_values().collect();
        sort_records(&mut records, order);
        records
    }

    /// Snapshot the current winners in canonical order without consuming
    /// the accumulator (used for partial cache entries).
    pub fn sorted_records(&self, order: OutputOrder) -> Vec<TimeSeriesRecord> {
        let mut records: Vec<TimeSeriesRecord> = self.winners.values().cloned().collect();
        sort_records(&mut records, order);
        records
    }
}

fn sort_records(records: &mut [TimeSeriesRecord], order: OutputOrder) {
    match order {
        OutputOrder::Canonical => {
            records.sort_by(|a, b| canonical_key(a).cmp(&canonical_key(b)));
        }
    }
}

type CanonicalKey<'a> = (usize, &'a str, &'a str, &'a str);

fn canonical_key(record: &TimeSeriesRecord) -> CanonicalKey<'_> {
    (
        record.original_code_index.unwrap_or(usize::MAX),
        record.series_code.as_str(),
        record.survey_date.as_str(),
        record.last_update.as_deref().unwrap_or(""),
    )
}

/// Latest-LAST_UPDATE wins; ties (and missing values) break toward the
/// earlier `(source_page_index, source_row_index)`.
fn choose_record<'a>(
    existing: &'a TimeSeriesRecord,
    incoming: &'a TimeSeriesRecord,
) -> &'a TimeSeriesRecord {
    match (&existing.last_update, &incoming.last_update) {
        (None, Some(_)) => incoming,
        (Some(_), None) => existing,
        (Some(a), Some(b)) if b > a => incoming,
        (Some(a), Some(b)) if b < a => existing,
        _ => {
            let existing_rank = (existing.source_page_index, existing.source_row_index);
            let incoming_rank = (incoming.source_page_index, incoming.source_row_index);
            if existing_rank <= incoming_rank {
                existing
            } else {
                incoming
            }
        }
    }
}
