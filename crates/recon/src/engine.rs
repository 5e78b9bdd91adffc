use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::classify::classify_match;
use crate::compare::{detect_mismatches, MismatchSet};
use crate::config::ReconMetadata;
use crate::error::ReconError;
use crate::ledger::UnifiedLedger;
use crate::matcher::{correlate, render_key};
use crate::model::{Direction, EntityId, MatchStatus, ReconciliationRecord, System};
use crate::plan::{plan_run, EntityPlan, PlannedEntity, RunPlan};
use crate::relation::{Relation, RelationSource};
use crate::summary::{compute_summary, EntityOutcome, EntityResult, RunReport, RunStatus};

/// Identity stamped on every record of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub load_timestamp: DateTime<Utc>,
}

impl RunContext {
    /// Fresh run: random v4 id, current instant.
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            load_timestamp: Utc::now(),
        }
    }

    pub fn with_id(run_id: impl Into<String>, load_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            load_timestamp,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Plan and execute a run over every registered entity.
///
/// Only globally invalid metadata is an error here. Entity faults are
/// isolated and reported on the [`RunReport`].
pub fn run<S>(metadata: &ReconMetadata, source: &S, ctx: &RunContext) -> Result<RunReport, ReconError>
where
    S: RelationSource + ?Sized,
{
    metadata.validate()?;
    let plan = plan_run(metadata);
    Ok(execute(&plan, source, ctx))
}

/// Execute a plan: one task per entity, at most `plan.parallelism` at a
/// time, then aggregate the successful record sets into one ledger.
pub fn execute<S>(plan: &RunPlan, source: &S, ctx: &RunContext) -> RunReport
where
    S: RelationSource + ?Sized,
{
    info!(
        "run {}: reconciling {} entities with up to {} workers",
        ctx.run_id,
        plan.entities.len(),
        plan.parallelism
    );

    let results = run_tasks(plan, source, ctx);

    let mut outcomes = Vec::with_capacity(results.len());
    let mut sets = Vec::new();
    for (planned, result) in plan.entities.iter().zip(results) {
        let warnings = plan
            .normalization
            .warnings_for(&planned.entity)
            .cloned()
            .collect();
        match result {
            Ok(records) => {
                info!("{}: {} record(s)", planned.entity, records.len());
                outcomes.push(EntityOutcome {
                    entity: planned.entity.clone(),
                    result: EntityResult::Succeeded {
                        records: records.len(),
                    },
                    warnings,
                });
                sets.push(records);
            }
            Err(err) => {
                error!("run {}: {err}", ctx.run_id);
                outcomes.push(EntityOutcome::failure(planned.entity.clone(), &err, warnings));
            }
        }
    }

    let ledger = UnifiedLedger::aggregate(sets);
    let status = RunStatus::from_outcomes(&outcomes);
    info!(
        "run {}: {:?}, {} ledger record(s)",
        ctx.run_id,
        status,
        ledger.len()
    );

    RunReport {
        run_id: ctx.run_id.clone(),
        load_timestamp: ctx.load_timestamp,
        status,
        summary: compute_summary(&ledger.records),
        outcomes,
        warnings: plan.normalization.warnings.clone(),
        ledger,
    }
}

type TaskResult = Result<Vec<ReconciliationRecord>, ReconError>;

/// Fan entity tasks out over scoped worker threads. Results come back in
/// plan order; the only synchronization is the final join.
fn run_tasks<S>(plan: &RunPlan, source: &S, ctx: &RunContext) -> Vec<TaskResult>
where
    S: RelationSource + ?Sized,
{
    let n = plan.entities.len();
    if n == 0 {
        return Vec::new();
    }
    let workers = plan.parallelism.clamp(1, n);
    let mut slots: Vec<Option<TaskResult>> = (0..n).map(|_| None).collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                scope.spawn(move || {
                    (w..n)
                        .step_by(workers)
                        .map(|i| (i, reconcile_isolated(&plan.entities[i], source, ctx)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            if let Ok(done) = handle.join() {
                for (i, result) in done {
                    slots[i] = Some(result);
                }
            }
        }
    });

    slots
        .into_iter()
        .zip(&plan.entities)
        .map(|(slot, planned)| {
            slot.unwrap_or_else(|| {
                Err(ReconError::TaskPanicked {
                    entity: planned.entity.clone(),
                })
            })
        })
        .collect()
}

fn reconcile_isolated<S>(planned: &PlannedEntity, source: &S, ctx: &RunContext) -> TaskResult
where
    S: RelationSource + ?Sized,
{
    let plan = planned.plan.as_ref().map_err(Clone::clone)?;
    panic::catch_unwind(AssertUnwindSafe(|| reconcile_entity(plan, source, ctx))).unwrap_or_else(
        |_| {
            Err(ReconError::TaskPanicked {
                entity: planned.entity.clone(),
            })
        },
    )
}

/// Reconcile one entity: fetch both staged relations, correlate them on the
/// join plan, compare correlated pairs and emit one record per join row.
///
/// All or nothing: on error no record of this entity is returned.
pub fn reconcile_entity<S>(
    plan: &EntityPlan,
    source: &S,
    ctx: &RunContext,
) -> Result<Vec<ReconciliationRecord>, ReconError>
where
    S: RelationSource + ?Sized,
{
    let entity = &plan.entity;
    let a = source.fetch(entity, System::A)?;
    let b = source.fetch(entity, System::B)?;

    let a_keys = resolve_columns(entity, System::A, &a, plan.join.predicates.iter().map(|p| p.column_a.as_str()))?;
    let b_keys = resolve_columns(entity, System::B, &b, plan.join.predicates.iter().map(|p| p.column_b.as_str()))?;
    let a_cols = resolve_columns(entity, System::A, &a, plan.comparison.rules.iter().map(|r| r.attribute_a.as_str()))?;
    let b_cols = resolve_columns(entity, System::B, &b, plan.comparison.rules.iter().map(|r| r.attribute_b.as_str()))?;

    debug!(
        "{entity}: {} A row(s), {} B row(s), join on {}",
        a.len(),
        b.len(),
        plan.join.describe()
    );

    let stamp = Stamp { plan, ctx };
    let mut records = Vec::new();

    for c in correlate(&a, &a_keys, &b, &b_keys) {
        let row_a = c.a.map(|i| a.rows[i].as_slice());
        let row_b = c.b.map(|i| b.rows[i].as_slice());

        let mismatches = match (row_a, row_b) {
            (Some(ra), Some(rb)) => {
                detect_mismatches(&plan.comparison, |i| &ra[a_cols[i]], |i| &rb[b_cols[i]])
            }
            _ => MismatchSet::new(),
        };
        let status = classify_match(row_a.is_some(), row_b.is_some(), &mismatches);
        if !stamp.includes(status) {
            continue;
        }

        records.push(stamp.record(
            row_a.map(|r| render_key(r, &a_keys)),
            row_b.map(|r| render_key(r, &b_keys)),
            status,
            mismatches,
        ));
    }

    Ok(records)
}

fn resolve_columns<'n>(
    entity: &EntityId,
    system: System,
    relation: &Relation,
    names: impl Iterator<Item = &'n str>,
) -> Result<Vec<usize>, ReconError> {
    names
        .map(|name| {
            relation.column_index(name).ok_or_else(|| {
                ReconError::data_access(entity, system, format!("column '{name}' not found"))
            })
        })
        .collect()
}

/// Applies the entity's reconciliation type to raw join rows: which
/// statuses are emitted and which system is reported as source.
struct Stamp<'p> {
    plan: &'p EntityPlan,
    ctx: &'p RunContext,
}

impl Stamp<'_> {
    fn includes(&self, status: MatchStatus) -> bool {
        match status {
            MatchStatus::MissingInA => self.plan.rule.emits_missing_in_a(),
            MatchStatus::MissingInB => self.plan.rule.emits_missing_in_b(),
            MatchStatus::Matched | MatchStatus::Mismatch => true,
        }
    }

    fn record(
        &self,
        key_a: Option<String>,
        key_b: Option<String>,
        status: MatchStatus,
        mismatches: MismatchSet,
    ) -> ReconciliationRecord {
        let plan = self.plan;
        let (source, target) = match (plan.rule.direction, status) {
            (Direction::BothWays, MatchStatus::MissingInA) => (&plan.system_b, &plan.system_a),
            _ => (&plan.system_a, &plan.system_b),
        };
        ReconciliationRecord::new(
            &plan.entity,
            source,
            target,
            key_a,
            key_b,
            status,
            mismatches,
            &plan.rule.name,
            &self.ctx.run_id,
            self.ctx.load_timestamp,
        )
    }
}
