use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mockall::mock;
use strata_core::{BlobPath, MaterializationContract};
use strata_store::{BlobInfo, BlobStore, ContractStore, StoreResult};

mock! {
    pub(crate) Contracts {}

    #[async_trait]
    impl ContractStore for Contracts {
        async fn list_expired(&self, before: DateTime<Utc>) -> StoreResult<Vec<MaterializationContract>>;
        async fn mark_expired(
            &self,
            contract_id: &str,
            tenant_id: &str,
            expired_at: DateTime<Utc>,
        ) -> StoreResult<()>;
        async fn mark_lineage_expired(
            &self,
            source_file_id: &str,
            tenant_id: &str,
            expired_at: DateTime<Utc>,
        ) -> StoreResult<usize>;
    }
}

mock! {
    pub(crate) Blobs {}

    #[async_trait]
    impl BlobStore for Blobs {
        async fn upload(&self, path: &BlobPath, bytes: Bytes) -> StoreResult<bool>;
        async fn download(&self, path: &BlobPath) -> StoreResult<Option<Bytes>>;
        async fn delete(&self, path: &BlobPath) -> StoreResult<bool>;
        async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobInfo>>;
    }
}
