//! TTL enforcement sweep
//!
//! A contract moves `active -> expired` once, never back. Each sweep:
//!
//! 1. lists active contracts whose `expires_at` has passed
//! 2. purges the blob of byte-bearing contracts
//! 3. marks the contract expired
//! 4. stamps the source file's lineage
//!
//! Sweeps are re-entrant: deleting an absent blob succeeds and lineage
//! stamps keep the earliest time, so running twice changes nothing the
//! second time.

use crate::config::TtlConfig;
use crate::error::TtlError;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{BlobPath, MaterializationContract};
use strata_store::{BlobStore, ContractStore, StoreError};

/// Totals for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub contracts_found: usize,
    pub blobs_purged: usize,
    /// Byte-bearing contracts with no derivable blob path
    pub blobs_skipped: usize,
    pub contracts_updated: usize,
    pub lineage_updated: usize,
    /// One line per failed step; the sweep carried on past each
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl SweepReport {
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn absorb(&mut self, outcome: ContractOutcome) {
        self.blobs_purged += usize::from(outcome.blob_purged);
        self.blobs_skipped += usize::from(outcome.blob_skipped);
        self.contracts_updated += usize::from(outcome.contract_updated);
        self.lineage_updated += outcome.lineage_updated;
        self.errors.extend(outcome.errors);
    }
}

#[derive(Debug, Default)]
struct ContractOutcome {
    blob_purged: bool,
    blob_skipped: bool,
    contract_updated: bool,
    lineage_updated: usize,
    errors: Vec<String>,
}

/// Expires contracts and purges what they cover
pub struct TtlEnforcementJob {
    contracts: Arc<dyn ContractStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    config: TtlConfig,
}

impl TtlEnforcementJob {
    #[must_use]
    pub fn new(contracts: Arc<dyn ContractStore>, config: TtlConfig) -> Self {
        Self {
            contracts,
            blobs: None,
            config,
        }
    }

    /// Attach the blob store that holds contract artifacts
    #[must_use]
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &TtlConfig {
        &self.config
    }

    /// Active contracts due at `now`
    ///
    /// # Errors
    /// Returns [`TtlError::ContractQuery`] if the contract store fails.
    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<MaterializationContract>, TtlError> {
        self.contracts
            .list_expired(now)
            .await
            .map_err(TtlError::ContractQuery)
    }

    /// Sweep at the current time
    ///
    /// # Errors
    /// Returns [`TtlError::ContractQuery`] if the contract store fails.
    pub async fn run_once(&self) -> Result<SweepReport, TtlError> {
        self.run_sweep(Utc::now()).await
    }

    /// Sweep every contract due at `now`
    ///
    /// Contracts sharing a lineage file run one after another; distinct
    /// files run up to `concurrency` at a time.
    ///
    /// # Errors
    /// Returns [`TtlError::ContractQuery`] if expired contracts cannot be
    /// listed. Nothing else aborts the sweep.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, TtlError> {
        let expired = self.find_expired(now).await?;
        let mut report = SweepReport {
            contracts_found: expired.len(),
            dry_run: self.config.dry_run,
            ..SweepReport::default()
        };
        if expired.is_empty() {
            tracing::debug!("TTL sweep found no expired contracts");
            return Ok(report);
        }

        let groups = group_by_file(expired);
        let outcomes: Vec<Vec<ContractOutcome>> = stream::iter(groups)
            .map(|group| self.process_group(group, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            report.absorb(outcome);
        }
        report.errors.sort();

        for error in &report.errors {
            tracing::warn!("TTL sweep error: {}", error);
        }
        tracing::info!(
            found = report.contracts_found,
            purged = report.blobs_purged,
            skipped = report.blobs_skipped,
            expired = report.contracts_updated,
            lineage = report.lineage_updated,
            errors = report.errors.len(),
            dry_run = report.dry_run,
            "TTL sweep complete"
        );
        Ok(report)
    }

    async fn process_group(
        &self,
        group: Vec<MaterializationContract>,
        now: DateTime<Utc>,
    ) -> Vec<ContractOutcome> {
        let mut outcomes = Vec::with_capacity(group.len());
        for contract in &group {
            outcomes.push(self.process_contract(contract, now).await);
        }
        outcomes
    }

    async fn process_contract(&self, contract: &MaterializationContract, now: DateTime<Utc>) -> ContractOutcome {
        let id = contract.contract_id.as_str();
        let tenant = contract.tenant_id.as_str();
        let mut outcome = ContractOutcome::default();

        if contract.materialization_type.stores_bytes() {
            match contract.blob_path() {
                Some(path) => match self.purge_blob(&path).await {
                    Ok(()) => outcome.blob_purged = true,
                    Err(err) => {
                        // contract stays active so the next sweep retries the purge
                        outcome
                            .errors
                            .push(format!("{id}: blob purge failed at {path}: {err}"));
                        return outcome;
                    }
                },
                None => {
                    tracing::debug!("Contract {} has no blob path, skipping purge", id);
                    outcome.blob_skipped = true;
                }
            }
        }

        if self.config.dry_run {
            outcome.contract_updated = true;
            outcome.lineage_updated = usize::from(contract.lineage_file_id().is_some());
            return outcome;
        }

        if let Err(err) = self.contracts.mark_expired(id, tenant, now).await {
            outcome.errors.push(format!("{id}: mark expired failed: {err}"));
            return outcome;
        }
        outcome.contract_updated = true;
        tracing::debug!("Expired contract {} for tenant {}", id, tenant);

        if let Some(file_id) = contract.lineage_file_id() {
            match self.contracts.mark_lineage_expired(file_id, tenant, now).await {
                Ok(updated) => outcome.lineage_updated = updated,
                Err(err) => outcome
                    .errors
                    .push(format!("{id}: lineage stamp for {file_id} failed: {err}")),
            }
        }
        outcome
    }

    /// Delete a blob; an absent blob counts as purged
    async fn purge_blob(&self, path: &BlobPath) -> Result<(), StoreError> {
        if self.config.dry_run {
            tracing::info!("Dry run: would purge {}", path);
            return Ok(());
        }
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no blob store configured".to_string()))?;
        if !blobs.delete(path).await? {
            tracing::debug!("Blob {} already gone", path);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TtlEnforcementJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlEnforcementJob")
            .field("config", &self.config)
            .field("blob_store", &self.blobs.is_some())
            .finish_non_exhaustive()
    }
}

/// Group contracts by lineage file, keeping first-seen order
///
/// Contracts without a file id each form their own group.
fn group_by_file(contracts: Vec<MaterializationContract>) -> Vec<Vec<MaterializationContract>> {
    let mut groups: Vec<Vec<MaterializationContract>> = Vec::new();
    let mut by_file: HashMap<(String, String), usize> = HashMap::new();

    for contract in contracts {
        let Some(file_id) = contract.lineage_file_id().map(str::to_string) else {
            groups.push(vec![contract]);
            continue;
        };
        let key = (contract.tenant_id.clone(), file_id);
        match by_file.get(&key) {
            Some(&index) => groups[index].push(contract),
            None => {
                by_file.insert(key, groups.len());
                groups.push(vec![contract]);
            }
        }
    }
    groups
}
