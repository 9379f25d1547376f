//! The applied trial change, owned until it has been reverted

use crate::locks::TrialPermit;
use planwise_core::{Connection, PlanwiseError};
use std::sync::Arc;

/// The live change a trial made, and the statement that undoes it.
///
/// Once `apply` returns, the change is armed: `revert` disarms it, and
/// dropping an armed trial (the harness future was dropped mid-trial)
/// schedules the revert on the runtime and reports it as an error.
///
/// The trial lock travels with the change. It is released only after the
/// revert statement has returned, including the background revert of an
/// abandoned trial.
pub(crate) struct TrialContext {
    connection: Arc<dyn Connection>,
    applied_sql: String,
    revert_sql: String,
    permit: Option<TrialPermit>,
    armed: bool,
}

impl TrialContext {
    /// Issues the trial DDL. Nothing is armed if it fails, and the permit
    /// is released straight away.
    pub(crate) async fn apply(
        connection: Arc<dyn Connection>,
        applied_sql: String,
        revert_sql: String,
        permit: Option<TrialPermit>,
    ) -> Result<Self, PlanwiseError> {
        connection.execute(&applied_sql, &[]).await?;
        tracing::debug!(sql = %applied_sql, "trial change applied");
        Ok(Self {
            connection,
            applied_sql,
            revert_sql,
            permit,
            armed: true,
        })
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub(crate) fn applied_sql(&self) -> &str {
        &self.applied_sql
    }

    pub(crate) fn revert_sql(&self) -> &str {
        &self.revert_sql
    }

    /// Undoes the change. Once the statement has returned the trial is
    /// disarmed either way: a failed revert is escalated to the caller
    /// rather than retried behind its back.
    pub(crate) async fn revert(mut self) -> Result<(), PlanwiseError> {
        let result = self.connection.execute(&self.revert_sql, &[]).await;
        self.armed = false;
        result?;
        tracing::debug!(sql = %self.revert_sql, "trial change reverted");
        Ok(())
    }
}

impl Drop for TrialContext {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::error!(
            applied = %self.applied_sql,
            revert = %self.revert_sql,
            "validation trial abandoned with its change still applied"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = self.connection.clone();
                let revert_sql = self.revert_sql.clone();
                let permit = self.permit.take();
                handle.spawn(async move {
                    match connection.execute(&revert_sql, &[]).await {
                        Ok(_) => tracing::warn!(sql = %revert_sql, "abandoned trial reverted"),
                        Err(e) => tracing::error!(
                            sql = %revert_sql,
                            error = %e,
                            "abandoned trial could not be reverted; manual cleanup required"
                        ),
                    }
                    drop(permit);
                });
            }
            Err(_) => tracing::error!(
                sql = %self.revert_sql,
                "no runtime to revert abandoned trial; manual cleanup required"
            ),
        }
    }
}
