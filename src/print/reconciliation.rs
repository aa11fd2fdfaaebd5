use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capabilities::{AlertSink, Capabilities, Ledger, LedgerTx, Metering};
use crate::config;
use crate::print::allocation;
use crate::print::models::{
    AccountRef, Connection, JobRecord, PrintStatus, RecordKind, SupplierInfo, UsageLogEntry,
};
use crate::print::naming;
use crate::print::reporter::StatusReporter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub completed: usize,
    pub denied: usize,
    pub forced: usize,
    pub waiting: usize,
}

/// key: usage-reconciler -> settle in-flight jobs against the metering log
///
/// Separate pass over everything in PENDING_EXT. Each transition runs inside
/// one unit of work under the advisory write lock; the upstream report is
/// always the last step, after the local commit.
pub struct UsageReconciler {
    caps: Capabilities,
    reporter: Arc<StatusReporter>,
}

impl UsageReconciler {
    pub fn new(caps: Capabilities, reporter: Arc<StatusReporter>) -> Self {
        Self { caps, reporter }
    }

    pub async fn run_pass(&self, connection: &Connection) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        if !connection.metering {
            return Ok(summary);
        }

        let pending = self.caps.ledger.pending_external(&connection.id).await?;
        if pending.is_empty() {
            return Ok(summary);
        }

        let names: Vec<String> = pending
            .iter()
            .filter_map(|job| {
                job.supplier.as_ref().map(|supplier| {
                    naming::encode_job_name(
                        &job.title,
                        &connection.id,
                        &supplier.external_id,
                        *config::JOB_NAME_WIDTH,
                    )
                })
            })
            .collect();
        let entries = self
            .caps
            .metering
            .usage_log(connection, &names)
            .await?;

        // A usage-log entry settles at most one job per pass.
        let mut by_external: HashMap<String, UsageLogEntry> = HashMap::new();
        for entry in entries {
            if let Some((connection_id, external_id)) = naming::decode_job_name(&entry.document_name)
            {
                if connection_id == connection.id {
                    by_external.entry(external_id).or_insert(entry);
                }
            }
        }

        let now = Utc::now();
        for job in pending {
            let Some(supplier) = job.supplier.clone() else {
                continue;
            };
            match by_external.remove(&supplier.external_id) {
                Some(entry) if entry.printed => {
                    self.complete(connection, &job, &supplier, &entry).await?;
                    summary.completed += 1;
                }
                Some(entry) => {
                    self.deny(connection, &job, &supplier, &entry).await?;
                    summary.denied += 1;
                }
                None => {
                    let waited = now - supplier.received_at;
                    if waited > Duration::days(*config::USAGE_WAIT_DAYS) {
                        self.force_error(connection, &job, &supplier).await?;
                        summary.forced += 1;
                    } else {
                        summary.waiting += 1;
                    }
                }
            }
        }

        info!(
            connection = %connection.id,
            completed = summary.completed,
            denied = summary.denied,
            forced = summary.forced,
            waiting = summary.waiting,
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    async fn complete(
        &self,
        connection: &Connection,
        job: &JobRecord,
        supplier: &SupplierInfo,
        entry: &UsageLogEntry,
    ) -> Result<()> {
        let view = PayloadView::read(supplier.payload.as_ref());
        let log_comment = view.log_comment();
        let mut transactions = self.caps.ledger.transactions_for(job.id).await?;
        allocation::distribute(entry.usage_cost, &mut transactions, *config::COST_SCALE);

        let advisory = self.caps.ledger.advisory();
        let _write = advisory.write().await;
        let mut unit = self.caps.ledger.begin().await?;
        unit.lock(job.id).await?;

        let target = JobRecord {
            id: Uuid::new_v4(),
            connection_id: job.connection_id.clone(),
            kind: RecordKind::Target,
            owner: job.owner.clone(),
            title: job.title.clone(),
            supplier: None,
            linked: Some(job.id),
            created_at: Utc::now(),
        };
        unit.insert_job(&target).await?;

        for tx in &mut transactions {
            match tx.account.clone() {
                AccountRef::Personal { username } => {
                    let comment = naming::ledger_comment(
                        &view.user_token(&username),
                        tx.weight,
                        view.pages,
                        &view.media,
                        view.duplex,
                        view.color,
                        &supplier.external_id,
                        &job.title,
                        &log_comment,
                    );
                    let balance = self
                        .caps
                        .metering
                        .adjust_account(connection, &username, tx.amount, &comment)
                        .await?;
                    tx.balance_after = Some(balance);
                }
                AccountRef::Shared { parent, name } => {
                    let tokens = view.class_tokens(&name);
                    let user_field = if tokens.is_empty() { name.clone() } else { tokens };
                    let comment = naming::ledger_comment(
                        &user_field,
                        tx.weight,
                        view.pages,
                        &view.media,
                        view.duplex,
                        view.color,
                        &supplier.external_id,
                        &job.title,
                        &log_comment,
                    );
                    self.caps
                        .metering
                        .adjust_shared_account(connection, &parent, &name, tx.amount, &comment)
                        .await?;
                }
            }
            unit.update_transaction(tx).await?;
        }

        // Double-entry mirror on the connection's internal job-cost account.
        let total_weight: i64 = transactions.iter().map(|tx| tx.weight).sum();
        let mirror_comment = naming::ledger_comment(
            &view.user_token(&job.owner),
            total_weight,
            view.pages,
            &view.media,
            view.duplex,
            view.color,
            &supplier.external_id,
            &job.title,
            &log_comment,
        );
        self.caps
            .metering
            .adjust_shared_account(
                connection,
                &connection.shared_parent,
                "jobs",
                -entry.usage_cost,
                &mirror_comment,
            )
            .await?;

        unit.move_transactions(job.id, target.id).await?;

        let mut finished = job.clone();
        finished.linked = Some(target.id);
        if let Some(info) = finished.supplier.as_mut() {
            info.status = PrintStatus::Completed;
            info.payload = None;
        }
        unit.update_job(&finished).await?;
        unit.commit().await?;

        info!(
            job = %job.id,
            target = %target.id,
            cost = %entry.usage_cost,
            "external print completed and charged"
        );
        self.reporter
            .report(
                connection,
                &supplier.external_id,
                PrintStatus::Completed,
                "printed and charged",
            )
            .await?;
        Ok(())
    }

    async fn deny(
        &self,
        connection: &Connection,
        job: &JobRecord,
        supplier: &SupplierInfo,
        entry: &UsageLogEntry,
    ) -> Result<()> {
        let reason = entry.denied_reason.clone().unwrap_or_default();
        let (status, comment) = if reason.contains("TIMEOUT") {
            (
                PrintStatus::Expired,
                "print job expired before release".to_string(),
            )
        } else if reason.contains("DOCUMENT_TOO_LARGE") {
            (
                PrintStatus::Cancelled,
                "document exceeds the print queue size limit".to_string(),
            )
        } else {
            (
                PrintStatus::Cancelled,
                "print job was denied by the metering system".to_string(),
            )
        };

        warn!(job = %job.id, %reason, status = status.as_str(), "external print denied");
        self.close_without_charge(job, status).await?;
        self.reporter
            .report(connection, &supplier.external_id, status, &comment)
            .await?;
        Ok(())
    }

    async fn force_error(
        &self,
        connection: &Connection,
        job: &JobRecord,
        supplier: &SupplierInfo,
    ) -> Result<()> {
        self.close_without_charge(job, PrintStatus::Error).await?;

        let subject = format!(
            "print job {} has no metering outcome",
            supplier.external_id
        );
        let body = format!(
            "job {} on connection {} waited longer than {} days for a usage-log entry and was forced to ERROR",
            job.id, job.connection_id, *config::USAGE_WAIT_DAYS
        );
        self.caps.alerts.alert(&subject, &body).await;

        self.reporter
            .report(
                connection,
                &supplier.external_id,
                PrintStatus::Error,
                "no metering outcome within the wait bound",
            )
            .await?;
        Ok(())
    }

    /// Terminal transition with no balance mutation: provisional transactions
    /// are removed, the supplier payload is nulled.
    async fn close_without_charge(&self, job: &JobRecord, status: PrintStatus) -> Result<()> {
        let advisory = self.caps.ledger.advisory();
        let _write = advisory.write().await;
        let mut unit = self.caps.ledger.begin().await?;
        unit.lock(job.id).await?;

        let mut finished = job.clone();
        if let Some(info) = finished.supplier.as_mut() {
            info.status = status;
            info.payload = None;
        }
        unit.update_job(&finished).await?;
        unit.delete_transactions(job.id).await?;
        unit.commit().await?;
        Ok(())
    }
}

/// Typed view over the opaque supplier payload written at intake.
struct PayloadView {
    pages: u32,
    media: String,
    duplex: bool,
    color: bool,
    users: Vec<(String, String)>,
    skipped: i64,
    comment: String,
}

impl PayloadView {
    fn read(payload: Option<&Value>) -> Self {
        let field = |key: &str| payload.and_then(|value| value.get(key));
        let users = field("users")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(user, class)| {
                        (user.clone(), class.as_str().unwrap_or_default().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            pages: field("pages").and_then(Value::as_u64).unwrap_or(1) as u32,
            media: field("mediaSize")
                .and_then(Value::as_str)
                .unwrap_or("A4")
                .to_string(),
            duplex: field("duplex").and_then(Value::as_bool).unwrap_or(false),
            color: field("color").and_then(Value::as_bool).unwrap_or(false),
            users,
            skipped: field("skipped").and_then(Value::as_i64).unwrap_or(0),
            comment: field("comment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn user_token(&self, username: &str) -> String {
        self.users
            .iter()
            .find(|(user, class)| user == username && !class.is_empty())
            .map(|(user, class)| format!("{user}@{class}"))
            .unwrap_or_else(|| username.to_string())
    }

    fn class_tokens(&self, class: &str) -> String {
        let members: Vec<(String, String)> = self
            .users
            .iter()
            .filter(|(_, member_class)| member_class == class)
            .cloned()
            .collect();
        naming::class_member_tokens(&members)
    }

    /// Weight lost to skipped billing entries shows up here and nowhere else.
    fn log_comment(&self) -> String {
        match (self.comment.is_empty(), self.skipped > 0) {
            (true, true) => format!("uncharged copies: {}", self.skipped),
            (false, true) => format!("{}; uncharged copies: {}", self.comment, self.skipped),
            (_, false) => self.comment.clone(),
        }
    }
}
