//! Typed records stored through the state surface

mod contract;
mod file;
mod lineage;
mod state;

/// Free-form JSON object used for metadata maps
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub use contract::{
    ContractStatus, MaterializationContract, MaterializationType, FILE_ID_KEY, STORAGE_PATH_KEY,
};
pub use file::{guess_content_type, FileReference};
pub use lineage::{FileType, LineageChain, LineageFact};
pub use state::{
    ExecutionState, ExecutionStatus, SessionState, StateEntry, StatePayload, StateRecord, Tags,
};
