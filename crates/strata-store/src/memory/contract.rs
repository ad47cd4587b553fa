//! In-memory contract store

use crate::traits::{ContractStore, LineageExpirySink};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{ContractStatus, MaterializationContract};

/// Contract store held in memory
///
/// Lineage stamping is forwarded to an optional [`LineageExpirySink`]; with
/// none attached, `mark_lineage_expired` reports zero updates.
#[derive(Default)]
pub struct MemoryContractStore {
    contracts: RwLock<HashMap<String, MaterializationContract>>,
    lineage: Option<Arc<dyn LineageExpirySink>>,
}

impl MemoryContractStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward lineage stamps to `sink`
    #[must_use]
    pub fn with_lineage(mut self, sink: Arc<dyn LineageExpirySink>) -> Self {
        self.lineage = Some(sink);
        self
    }

    /// Add or replace a contract
    pub fn insert(&self, contract: MaterializationContract) {
        self.contracts
            .write()
            .insert(contract.contract_id.clone(), contract);
    }

    #[must_use]
    pub fn get(&self, contract_id: &str) -> Option<MaterializationContract> {
        self.contracts.read().get(contract_id).cloned()
    }

    /// Number of contracts in `status`
    #[must_use]
    pub fn count_by_status(&self, status: ContractStatus) -> usize {
        self.contracts
            .read()
            .values()
            .filter(|c| c.status == status)
            .count()
    }
}

impl std::fmt::Debug for MemoryContractStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContractStore")
            .field("contracts", &self.contracts.read().len())
            .field("lineage_sink", &self.lineage.is_some())
            .finish()
    }
}

#[async_trait]
impl ContractStore for MemoryContractStore {
    async fn list_expired(&self, before: DateTime<Utc>) -> StoreResult<Vec<MaterializationContract>> {
        let mut due: Vec<MaterializationContract> = self
            .contracts
            .read()
            .values()
            .filter(|c| c.is_due(before))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.contract_id.cmp(&b.contract_id))
        });
        Ok(due)
    }

    async fn mark_expired(
        &self,
        contract_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.contracts.write();
        let contract = guard
            .get_mut(contract_id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound(format!("contract {contract_id} ({tenant_id})")))?;

        if contract.status == ContractStatus::Expired {
            return Ok(());
        }
        contract.status = ContractStatus::Expired;
        contract.expired_at = Some(expired_at);
        Ok(())
    }

    async fn mark_lineage_expired(
        &self,
        source_file_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        match &self.lineage {
            Some(sink) => {
                sink.stamp_source_expired(source_file_id, tenant_id, expired_at)
                    .await
            }
            None => Ok(0),
        }
    }
}
