//! The validation state machine
//!
//! IDLE -> APPLYING -> MEASURING -> REVERTING -> DONE, with FAILED reachable
//! from the three middle phases. APPLYING covers the baseline measurement
//! and the trial DDL; nothing exists to undo until that DDL succeeds.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessErrorKind, HarnessState};
use crate::locks::{TrialKey, TrialLocks, TrialPermit};
use crate::measure::{MeasurementSeries, index_definition, measure_series};
use crate::trial::TrialContext;
use planwise_analyzer::{
    Assessment, Finding, PlanSummary, QueryFeatures, QueryType, SchemaChange, ValidatedEvidence,
    extract_features_for, improvement_pct,
};
use planwise_core::{Connection, EngineKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The statements a trial runs, derived from a finding's change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPlan {
    pub table: String,
    pub apply_sql: String,
    pub revert_sql: String,
}

/// Runs validation trials on one connection
pub struct Harness {
    connection: Arc<dyn Connection>,
    engine: EngineKind,
    config: HarnessConfig,
    cancel: CancellationToken,
    locks: Option<TrialLocks>,
    state: HarnessState,
    history: Vec<HarnessState>,
}

impl Harness {
    pub fn new(connection: Arc<dyn Connection>, config: HarnessConfig) -> Self {
        let engine = connection.engine();
        Self {
            connection,
            engine,
            config,
            cancel: CancellationToken::new(),
            locks: None,
            state: HarnessState::Idle,
            history: vec![HarnessState::Idle],
        }
    }

    /// Cancellation is honored between phases only. Once the trial change
    /// is applied, it is still reverted before the trial reports
    /// cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Serializes trials through a shared lock registry
    pub fn with_locks(mut self, locks: TrialLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Every state the last trial passed through, starting with IDLE
    pub fn history(&self) -> &[HarnessState] {
        &self.history
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn transition(&mut self, next: HarnessState) {
        tracing::debug!(from = %self.state, to = %next, "harness transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: HarnessError) -> HarnessError {
        if error.is_escalated() {
            tracing::error!(error = %error, "validation revert failed");
        } else {
            tracing::warn!(phase = %error.phase, error = %error.kind, "validation trial failed");
        }
        self.transition(HarnessState::Failed);
        error
    }

    fn check_cancelled(&self, phase: HarnessState) -> Result<(), HarnessError> {
        if self.cancel.is_cancelled() {
            return Err(HarnessError::new(phase, HarnessErrorKind::Cancelled));
        }
        Ok(())
    }

    /// Works out the apply and revert statements for `change`, reading the
    /// current definition of an index that is about to be dropped
    pub async fn plan_trial(&self, change: &SchemaChange) -> Result<TrialPlan, HarnessErrorKind> {
        match change {
            SchemaChange::CreateIndex { name, table, .. } => Ok(TrialPlan {
                table: table.clone(),
                apply_sql: change.to_sql(self.engine),
                revert_sql: SchemaChange::DropIndex {
                    name: name.clone(),
                    table: table.clone(),
                    schema: None,
                    definition: None,
                }
                .to_sql(self.engine),
            }),
            SchemaChange::DropIndex {
                name,
                table,
                schema,
                definition,
            } => {
                let revert_sql = match definition {
                    Some(def) => def.clone(),
                    None => {
                        index_definition(self.connection.as_ref(), schema.as_deref(), table, name)
                            .await?
                    }
                };
                Ok(TrialPlan {
                    table: table.clone(),
                    apply_sql: change.to_sql(self.engine),
                    revert_sql,
                })
            }
            SchemaChange::Analyze { .. } => Err(HarnessErrorKind::NotReversible(
                change.to_sql(self.engine),
            )),
        }
    }

    /// Measures `sql`, applies the finding's change, measures again and
    /// reverts the change.
    #[tracing::instrument(
        skip_all,
        fields(
            engine = %self.engine,
            rule = %finding.rule_id,
            sql_preview = %sql.chars().take(100).collect::<String>()
        )
    )]
    pub async fn run(
        &mut self,
        sql: &str,
        finding: &Finding,
    ) -> Result<ValidatedEvidence, HarnessError> {
        self.state = HarnessState::Idle;
        self.history = vec![HarnessState::Idle];

        self.transition(HarnessState::Applying);
        let (features, trial_plan) = match self.prepare(sql, finding).await {
            Ok(prepared) => prepared,
            Err(kind) => return Err(self.fail(HarnessError::new(HarnessState::Applying, kind))),
        };

        let permit = self.lock(&trial_plan).await;
        let read_only = features.query_type == QueryType::Select;
        let before = match self.baseline(sql, read_only).await {
            Ok(before) => before,
            Err(kind) => return Err(self.fail(HarnessError::new(HarnessState::Applying, kind))),
        };
        if let Err(e) = self.check_cancelled(HarnessState::Applying) {
            return Err(self.fail(e));
        }

        let trial = match TrialContext::apply(
            self.connection.clone(),
            trial_plan.apply_sql.clone(),
            trial_plan.revert_sql.clone(),
            permit,
        )
        .await
        {
            Ok(trial) => trial,
            Err(e) => {
                return Err(self.fail(HarnessError::new(
                    HarnessState::Applying,
                    HarnessErrorKind::statement(&trial_plan.apply_sql, e),
                )));
            }
        };

        self.transition(HarnessState::Measuring);
        let measured = match self.check_cancelled(HarnessState::Measuring) {
            Ok(()) => {
                measure_series(trial.connection(), sql, read_only, self.config.runs())
                    .await
                    .map_err(|kind| HarnessError::new(HarnessState::Measuring, kind))
            }
            Err(cancelled) => Err(cancelled),
        };

        self.transition(HarnessState::Reverting);
        let applied_sql = trial.applied_sql().to_string();
        let revert_sql = trial.revert_sql().to_string();
        if let Err(e) = trial.revert().await {
            return Err(self.fail(HarnessError::revert_failed(&revert_sql, e)));
        }

        let after = match measured {
            Ok(after) => after,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(HarnessState::Done);
        let evidence = build_evidence(
            finding,
            &features,
            &trial_plan.table,
            applied_sql,
            revert_sql,
            before,
            after,
        );
        tracing::info!(
            assessment = %evidence.assessment,
            improvement_pct = evidence.improvement_pct,
            "validation trial complete"
        );
        Ok(evidence)
    }

    async fn prepare(
        &self,
        sql: &str,
        finding: &Finding,
    ) -> Result<(QueryFeatures, TrialPlan), HarnessErrorKind> {
        if !finding.change.is_reversible() {
            return Err(HarnessErrorKind::NotReversible(
                finding.change.to_sql(self.engine),
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(HarnessErrorKind::Cancelled);
        }
        let features = extract_features_for(self.engine, sql)?;
        let trial_plan = self.plan_trial(&finding.change).await?;
        Ok((features, trial_plan))
    }

    async fn baseline(
        &self,
        sql: &str,
        read_only: bool,
    ) -> Result<MeasurementSeries, HarnessErrorKind> {
        if self.cancel.is_cancelled() {
            return Err(HarnessErrorKind::Cancelled);
        }
        measure_series(self.connection.as_ref(), sql, read_only, self.config.runs()).await
    }

    async fn lock(&self, trial_plan: &TrialPlan) -> Option<TrialPermit> {
        let locks = self.locks.as_ref()?;
        Some(
            locks
                .acquire(TrialKey::new(&trial_plan.table, &trial_plan.apply_sql))
                .await,
        )
    }
}

fn build_evidence(
    finding: &Finding,
    features: &QueryFeatures,
    table: &str,
    applied: String,
    reverted_with: String,
    before: MeasurementSeries,
    after: MeasurementSeries,
) -> ValidatedEvidence {
    let before_summary = PlanSummary::from_tree(&before.plan).resolve_relations(features);
    let after_summary = PlanSummary::from_tree(&after.plan).resolve_relations(features);

    let plan_improved =
        before_summary.has_full_scan_on(table) && after_summary.has_index_access_on(table);
    let improvement = improvement_pct(before.timing.mean_ms, after.timing.mean_ms);
    let cost_change_pct = (before.plan.total_cost() > 0.0)
        .then(|| improvement_pct(before.plan.total_cost(), after.plan.total_cost()));

    ValidatedEvidence {
        rule_id: finding.rule_id.clone(),
        applied,
        reverted_with,
        before: before_summary,
        after: after_summary,
        before_time: before.timing,
        after_time: after.timing,
        improvement_pct: improvement,
        cost_change_pct,
        plan_improved,
        assessment: Assessment::from_improvement(improvement, plan_improved),
        reverted: true,
    }
}

/// Runs one trial with default settings
pub async fn run_validation(
    connection: Arc<dyn Connection>,
    sql: &str,
    finding: &Finding,
) -> Result<ValidatedEvidence, HarnessError> {
    Harness::new(connection, HarnessConfig::default())
        .run(sql, finding)
        .await
}
