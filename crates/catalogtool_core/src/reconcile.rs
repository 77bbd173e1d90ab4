use std::fmt;
use std::ops::AddAssign;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{Action, RecordContext, SkipReason, classify};
use crate::config::{DEFAULT_PAGE_SIZE, FailurePolicy};
use crate::merge::{FilledField, fill_empty_fields};
use crate::model::{
    CatalogItem, Channel, ChannelId, ItemId, RecordId, TranslationRecord, TranslationStatus,
    unix_timestamp,
};
use crate::repository::{
    MalformedRecord, PageCursor, TranslationFilter, TranslationKey, TranslationRepository,
    UnitOfWork,
};
use crate::simulate::SimulatedRepository;
use crate::status::required_status;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub filter: TranslationFilter,
    pub dry_run: bool,
    pub page_size: usize,
    pub failure_policy: FailurePolicy,
    /// Keep trace lines for a real run too. Dry runs always keep them.
    pub trace: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            filter: TranslationFilter::default(),
            dry_run: false,
            page_size: DEFAULT_PAGE_SIZE,
            failure_policy: FailurePolicy::Continue,
            trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounters {
    pub updated: usize,
    pub merged: usize,
    pub deleted: usize,
}

impl ReconcileCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for ReconcileCounters {
    fn add_assign(&mut self, other: Self) {
        self.updated += other.updated;
        self.merged += other.merged;
        self.deleted += other.deleted;
    }
}

/// What happened to one visited record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Skip(SkipReason),
    Assign,
    Merge,
    Promote,
    Demote,
    NoOp,
    Failed,
}

impl RecordOutcome {
    pub fn counters(self) -> ReconcileCounters {
        match self {
            Self::Assign | Self::Promote | Self::Demote => ReconcileCounters {
                updated: 1,
                ..ReconcileCounters::default()
            },
            Self::Merge => ReconcileCounters {
                updated: 0,
                merged: 1,
                deleted: 1,
            },
            Self::Skip(_) | Self::NoOp | Self::Failed => ReconcileCounters::default(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip(_) => "skip",
            Self::Assign => "assign",
            Self::Merge => "merge",
            Self::Promote => "promote",
            Self::Demote => "demote",
            Self::NoOp => "no_op",
            Self::Failed => "failed",
        }
    }
}

/// Human-readable account of one applied (or planned) action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TraceLine {
    Assign {
        record_id: RecordId,
        item_id: ItemId,
        language: String,
        channel_after: ChannelId,
        status_before: TranslationStatus,
        status_after: TranslationStatus,
    },
    Merge {
        record_id: RecordId,
        canonical_id: RecordId,
        item_id: ItemId,
        language: String,
        filled: Vec<FilledField>,
        status_before: TranslationStatus,
        status_after: TranslationStatus,
    },
    Status {
        record_id: RecordId,
        item_id: ItemId,
        language: String,
        status_before: TranslationStatus,
        status_after: TranslationStatus,
    },
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign {
                record_id,
                item_id,
                language,
                channel_after,
                status_before,
                status_after,
            } => write!(
                f,
                "assign item={item_id} lang={language} record={record_id} channel: <none> -> {channel_after} status: {status_before} -> {status_after}"
            ),
            Self::Merge {
                record_id,
                canonical_id,
                item_id,
                language,
                filled,
                status_before,
                status_after,
            } => {
                let filled = if filled.is_empty() {
                    "<none>".to_string()
                } else {
                    filled
                        .iter()
                        .map(|field| field.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                };
                write!(
                    f,
                    "merge item={item_id} lang={language} record={record_id} into={canonical_id} filled: {filled} status: {status_before} -> {status_after}"
                )
            }
            Self::Status {
                record_id,
                item_id,
                language,
                status_before,
                status_after,
            } => write!(
                f,
                "status item={item_id} lang={language} record={record_id} status: {status_before} -> {status_after}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: RecordId,
    pub item_id: ItemId,
    pub language: String,
    pub action: RecordOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub item_id: Option<ItemId>,
    pub language: Option<String>,
    pub page_size: usize,
    pub visited: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub counters: ReconcileCounters,
    pub failures: Vec<RecordFailure>,
    pub aborted: bool,
    pub actions: Vec<TraceLine>,
}

impl ReconcileReport {
    fn new(options: &ReconcileOptions) -> Self {
        Self {
            dry_run: options.dry_run,
            item_id: options.filter.item_id,
            language: options.filter.language.clone(),
            page_size: options.page_size,
            visited: 0,
            skipped: 0,
            unchanged: 0,
            counters: ReconcileCounters::default(),
            failures: Vec::new(),
            aborted: false,
            actions: Vec::new(),
        }
    }

    /// Records a per-record failure and returns whether the run must stop.
    fn record_failure(
        &mut self,
        key: &TranslationKey,
        action: RecordOutcome,
        error: &anyhow::Error,
        options: &ReconcileOptions,
    ) -> bool {
        let message = format!("{error:#}");
        warn!(
            record_id = key.record_id,
            item_id = key.item_id,
            language = %key.language,
            action = action.as_str(),
            error = %message,
            "failed to reconcile translation"
        );
        self.failures.push(RecordFailure {
            record_id: key.record_id,
            item_id: key.item_id,
            language: key.language.clone(),
            action,
            message,
        });
        if options.failure_policy == FailurePolicy::Abort {
            self.aborted = true;
        }
        self.aborted
    }

    fn tally(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Skip(_) => self.skipped += 1,
            RecordOutcome::NoOp => self.unchanged += 1,
            _ => {}
        }
        self.counters += outcome.counters();
    }
}

/// Mutation decided for one record, not yet applied.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Leave(RecordOutcome),
    Apply {
        outcome: RecordOutcome,
        unit: UnitOfWork,
        trace: TraceLine,
    },
}

/// Walk every record matching the filter and restore the ownership invariants.
///
/// A dry run executes the same traversal against a [`SimulatedRepository`]
/// wrapped around `repository`, so its counters match a real run.
pub fn reconcile<R: TranslationRepository>(
    repository: &mut R,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    info!(
        dry_run = options.dry_run,
        item_id = ?options.filter.item_id,
        language = ?options.filter.language,
        page_size = options.page_size,
        "starting translation reconciliation"
    );
    let report = if options.dry_run {
        let mut simulated = SimulatedRepository::new(repository);
        let report = run_traversal(&mut simulated, options)?;
        debug!(
            pending = simulated.pending_changes(),
            "discarding planned changes"
        );
        report
    } else {
        run_traversal(repository, options)?
    };
    info!(
        visited = report.visited,
        skipped = report.skipped,
        updated = report.counters.updated,
        merged = report.counters.merged,
        deleted = report.counters.deleted,
        failed = report.failures.len(),
        aborted = report.aborted,
        "translation reconciliation finished"
    );
    Ok(report)
}

fn run_traversal<R: TranslationRepository>(
    repository: &mut R,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let page_size = options.page_size.max(1);
    let keep_trace = options.dry_run || options.trace;
    let mut report = ReconcileReport::new(options);
    let mut cursor: Option<PageCursor> = None;

    loop {
        let page = repository
            .find_translations(&options.filter, cursor, page_size)
            .context("failed to load translation page")?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(PageCursor::after(last));

        for key in page {
            // Earlier units may have changed or deleted this record since the page was listed.
            let record = match repository.load_translation(key.record_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(record_id = key.record_id, "translation merged away earlier in the run");
                    continue;
                }
                Err(error) if MalformedRecord::find_in(&error).is_some() => {
                    report.visited += 1;
                    if report.record_failure(&key, RecordOutcome::Failed, &error, options) {
                        return Ok(report);
                    }
                    continue;
                }
                Err(error) => return Err(error),
            };
            report.visited += 1;

            let plan = match plan_record(repository, &record) {
                Ok(plan) => plan,
                Err(error) if MalformedRecord::find_in(&error).is_some() => {
                    if report.record_failure(&key, RecordOutcome::Failed, &error, options) {
                        return Ok(report);
                    }
                    continue;
                }
                Err(error) => return Err(error),
            };

            let outcome = match plan {
                Plan::Leave(outcome) => outcome,
                Plan::Apply {
                    outcome,
                    unit,
                    trace,
                } => match repository.commit(&unit) {
                    Ok(()) => {
                        debug!(record_id = record.id, "{trace}");
                        if keep_trace {
                            report.actions.push(trace);
                        }
                        outcome
                    }
                    Err(error) => {
                        if report.record_failure(&key, outcome, &error, options) {
                            return Ok(report);
                        }
                        continue;
                    }
                },
            };
            report.tally(outcome);
        }
    }

    Ok(report)
}

fn plan_record<R: TranslationRepository>(
    repository: &mut R,
    record: &TranslationRecord,
) -> Result<Plan> {
    let item = repository.resolve_item(record.item_id)?;
    let owning_channel = match &item {
        Some(_) => repository.resolve_owning_channel(record.item_id)?,
        None => None,
    };
    let record_channel = match (record.channel_id, &owning_channel) {
        (Some(channel_id), Some(owner)) if owner.id == channel_id => Some(owner.clone()),
        (Some(channel_id), Some(_)) => repository.resolve_channel(channel_id)?,
        _ => None,
    };

    let context = RecordContext {
        item: item.as_ref(),
        owning_channel: owning_channel.as_ref(),
        record_channel: record_channel.as_ref(),
    };
    let action = classify(record, &context);
    debug!(record_id = record.id, ?action, "classified translation");

    match action {
        Action::Skip(reason) => Ok(Plan::Leave(RecordOutcome::Skip(reason))),
        Action::NoOp => Ok(Plan::Leave(RecordOutcome::NoOp)),
        Action::AssignChannel { target } => {
            // Both are resolved, otherwise classify would have skipped.
            let (Some(item), Some(owner)) = (item.as_ref(), owning_channel.as_ref()) else {
                return Ok(Plan::Leave(RecordOutcome::NoOp));
            };
            match repository.find_record(record.item_id, target, &record.language, record.id)? {
                Some(canonical) => plan_merge(canonical, record, item, owner),
                None => plan_assign(record, item, owner),
            }
        }
        Action::PromoteToSynced => plan_transition(record, TranslationStatus::Synced),
        Action::DemoteToDraft => plan_transition(record, TranslationStatus::Draft),
    }
}

fn plan_merge(
    mut canonical: TranslationRecord,
    duplicate: &TranslationRecord,
    item: &CatalogItem,
    channel: &Channel,
) -> Result<Plan> {
    let status_before = canonical.status;
    let filled = fill_empty_fields(&mut canonical, duplicate);
    canonical.status = required_status(
        channel.is_primary,
        &canonical.language,
        &item.reference_language,
        canonical.status,
    );
    canonical.touch(unix_timestamp()?);

    let trace = TraceLine::Merge {
        record_id: duplicate.id,
        canonical_id: canonical.id,
        item_id: duplicate.item_id,
        language: duplicate.language.clone(),
        filled,
        status_before,
        status_after: canonical.status,
    };
    Ok(Plan::Apply {
        outcome: RecordOutcome::Merge,
        unit: UnitOfWork::Merge {
            canonical,
            duplicate_id: duplicate.id,
        },
        trace,
    })
}

fn plan_assign(
    record: &TranslationRecord,
    item: &CatalogItem,
    channel: &Channel,
) -> Result<Plan> {
    let mut assigned = record.clone();
    assigned.channel_id = Some(channel.id);
    assigned.status = required_status(
        channel.is_primary,
        &assigned.language,
        &item.reference_language,
        assigned.status,
    );
    assigned.touch(unix_timestamp()?);

    let trace = TraceLine::Assign {
        record_id: record.id,
        item_id: record.item_id,
        language: record.language.clone(),
        channel_after: channel.id,
        status_before: record.status,
        status_after: assigned.status,
    };
    Ok(Plan::Apply {
        outcome: RecordOutcome::Assign,
        unit: UnitOfWork::Save(assigned),
        trace,
    })
}

fn plan_transition(record: &TranslationRecord, target: TranslationStatus) -> Result<Plan> {
    if record.status == target {
        return Ok(Plan::Leave(RecordOutcome::NoOp));
    }
    let mut changed = record.clone();
    changed.status = target;
    changed.touch(unix_timestamp()?);

    let outcome = match target {
        TranslationStatus::Synced => RecordOutcome::Promote,
        TranslationStatus::Draft => RecordOutcome::Demote,
    };
    let trace = TraceLine::Status {
        record_id: record.id,
        item_id: record.item_id,
        language: record.language.clone(),
        status_before: record.status,
        status_after: target,
    };
    Ok(Plan::Apply {
        outcome,
        unit: UnitOfWork::Save(changed),
        trace,
    })
}
