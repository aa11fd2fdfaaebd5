use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::capabilities::{Ledger, LedgerTx};
use crate::error::StoreError;
use crate::print::models::{AccountTransaction, JobRecord, LocalUser, PrintStatus, RecordKind};

#[derive(Debug, Default, Clone)]
struct State {
    users: HashMap<String, LocalUser>,
    jobs: HashMap<Uuid, JobRecord>,
    // Insertion order kept so reads stay deterministic.
    transactions: Vec<AccountTransaction>,
}

/// key: memory-ledger -> reference implementation of the ledger capability
///
/// Backs simulation mode and the test suite. A unit of work stages a full
/// copy of the state; `commit` swaps it in, dropping the unit discards it,
/// which gives the same rollback-by-default contract a database transaction
/// has.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<State>>,
    advisory: Arc<RwLock<()>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, user: LocalUser) {
        let mut state = self.state.lock().await;
        state.users.insert(user.username.clone(), user);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    fn advisory(&self) -> Arc<RwLock<()>> {
        self.advisory.clone()
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let staged = self.state.lock().await.clone();
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            staged,
        }))
    }

    async fn find_user(&self, username: &str) -> Result<Option<LocalUser>, StoreError> {
        Ok(self.state.lock().await.users.get(username).cloned())
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn pending_external(&self, connection_id: &str) -> Result<Vec<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|record| {
                record.kind == RecordKind::Source
                    && record.connection_id == connection_id
                    && record.status() == Some(PrintStatus::PendingExt)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|record| record.created_at);
        Ok(pending)
    }

    async fn transactions_for(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<AccountTransaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.job_id == job_id)
            .cloned()
            .collect())
    }
}

struct MemoryTx {
    shared: Arc<Mutex<State>>,
    staged: State,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock(&mut self, job_id: Uuid) -> Result<(), StoreError> {
        // Single-writer in-process store: the row lock degenerates to an
        // existence check.
        if self.staged.jobs.contains_key(&job_id) {
            Ok(())
        } else {
            Err(StoreError(format!("lock target missing: {job_id}")))
        }
    }

    async fn insert_user(&mut self, user: &LocalUser) -> Result<(), StoreError> {
        self.staged
            .users
            .insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn insert_job(&mut self, record: &JobRecord) -> Result<(), StoreError> {
        if self.staged.jobs.contains_key(&record.id) {
            return Err(StoreError(format!("duplicate job record: {}", record.id)));
        }
        self.staged.jobs.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_job(&mut self, record: &JobRecord) -> Result<(), StoreError> {
        match self.staged.jobs.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError(format!("unknown job record: {}", record.id))),
        }
    }

    async fn insert_transactions(
        &mut self,
        transactions: &[AccountTransaction],
    ) -> Result<(), StoreError> {
        self.staged.transactions.extend_from_slice(transactions);
        Ok(())
    }

    async fn update_transaction(
        &mut self,
        transaction: &AccountTransaction,
    ) -> Result<(), StoreError> {
        match self
            .staged
            .transactions
            .iter_mut()
            .find(|tx| tx.id == transaction.id)
        {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(())
            }
            None => Err(StoreError(format!(
                "unknown account transaction: {}",
                transaction.id
            ))),
        }
    }

    async fn move_transactions(&mut self, from: Uuid, to: Uuid) -> Result<(), StoreError> {
        for tx in self
            .staged
            .transactions
            .iter_mut()
            .filter(|tx| tx.job_id == from)
        {
            tx.job_id = to;
        }
        Ok(())
    }

    async fn delete_transactions(&mut self, job_id: Uuid) -> Result<(), StoreError> {
        self.staged.transactions.retain(|tx| tx.job_id != job_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        *self.shared.lock().await = self.staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::print::models::SupplierInfo;

    fn source_record(connection_id: &str) -> JobRecord {
        JobRecord {
            id: Uuid::new_v4(),
            connection_id: connection_id.to_string(),
            kind: RecordKind::Source,
            owner: "alice".to_string(),
            title: "essay".to_string(),
            supplier: Some(SupplierInfo {
                supplier: "portal".to_string(),
                external_id: "41".to_string(),
                status: PrintStatus::PendingExt,
                payload: None,
                received_at: Utc::now(),
            }),
            linked: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let ledger = MemoryLedger::new();
        let record = source_record("c1");
        {
            let mut tx = ledger.begin().await.unwrap();
            tx.insert_job(&record).await.unwrap();
            // dropped without commit
        }
        assert!(ledger.job(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let ledger = MemoryLedger::new();
        let record = source_record("c1");
        let mut tx = ledger.begin().await.unwrap();
        tx.insert_job(&record).await.unwrap();
        tx.commit().await.unwrap();
        assert!(ledger.job(record.id).await.unwrap().is_some());
        assert_eq!(ledger.pending_external("c1").await.unwrap().len(), 1);
        assert!(ledger.pending_external("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn locking_a_missing_record_fails() {
        let ledger = MemoryLedger::new();
        let mut tx = ledger.begin().await.unwrap();
        assert!(tx.lock(Uuid::new_v4()).await.is_err());
    }
}
