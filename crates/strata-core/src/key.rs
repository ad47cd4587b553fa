//! Namespaced state keys and file reference identifiers

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Namespace of a state entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Execution state of a pipeline run
    Execution,
    /// User/session state
    Session,
    /// File reference metadata
    File,
    /// Lineage facts
    Lineage,
}

impl StateKind {
    /// All kinds, in key order
    pub const ALL: [StateKind; 4] = [Self::Execution, Self::Session, Self::File, Self::Lineage];

    /// Key prefix for this kind
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Session => "session",
            Self::File => "file",
            Self::Lineage => "lineage",
        }
    }
}

impl Display for StateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

/// Composite key `{kind}:{tenant_id}:{resource_id}`
///
/// The tenant id never contains `:`. The resource id may, since file
/// reference ids are themselves colon-separated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    kind: StateKind,
    tenant_id: String,
    resource_id: String,
}

impl StateKey {
    /// Build a key
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidKey`] if the tenant is empty or contains
    /// `:`, or the resource id is empty.
    pub fn new(
        kind: StateKind,
        tenant_id: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let tenant_id = tenant_id.into();
        let resource_id = resource_id.into();
        validate_tenant(&tenant_id)?;
        if resource_id.is_empty() {
            return Err(CoreError::InvalidKey("empty resource id".to_string()));
        }
        Ok(Self {
            kind,
            tenant_id,
            resource_id,
        })
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[inline]
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Prefix shared by every key of `kind` for `tenant_id`
    #[must_use]
    pub fn namespace_prefix(kind: StateKind, tenant_id: &str) -> String {
        format!("{kind}:{tenant_id}:")
    }
}

impl Display for StateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.tenant_id, self.resource_id)
    }
}

impl FromStr for StateKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(tenant), Some(resource)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidKey(s.to_string()));
        };
        Self::new(kind.parse()?, tenant, resource)
    }
}

/// File reference id `file:{tenant}:{session}:{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileRefId {
    tenant_id: String,
    session_id: String,
    file_uuid: Uuid,
}

impl FileRefId {
    /// Mint a fresh id for an upload
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidRefId`] if tenant or session is empty or
    /// contains `:`.
    pub fn generate(tenant_id: &str, session_id: &str) -> Result<Self, CoreError> {
        Self::new(tenant_id, session_id, Uuid::new_v4())
    }

    /// Build an id from parts
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidRefId`] on empty or colon-bearing parts.
    pub fn new(tenant_id: &str, session_id: &str, file_uuid: Uuid) -> Result<Self, CoreError> {
        for (label, part) in [("tenant", tenant_id), ("session", session_id)] {
            if part.is_empty() || part.contains(':') {
                return Err(CoreError::InvalidRefId(format!("bad {label} segment: {part:?}")));
            }
        }
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            session_id: session_id.to_string(),
            file_uuid,
        })
    }

    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[inline]
    #[must_use]
    pub fn file_uuid(&self) -> Uuid {
        self.file_uuid
    }

    /// State key under which the reference metadata is stored
    #[must_use]
    pub fn state_key(&self) -> StateKey {
        StateKey {
            kind: StateKind::File,
            tenant_id: self.tenant_id.clone(),
            resource_id: self.to_string(),
        }
    }
}

impl Display for FileRefId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}:{}:{}", self.tenant_id, self.session_id, self.file_uuid)
    }
}

impl FromStr for FileRefId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["file", tenant, session, uuid] => {
                let file_uuid = uuid
                    .parse::<Uuid>()
                    .map_err(|e| CoreError::InvalidRefId(format!("{s}: {e}")))?;
                Self::new(tenant, session, file_uuid)
            }
            _ => Err(CoreError::InvalidRefId(s.to_string())),
        }
    }
}

impl TryFrom<String> for FileRefId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileRefId> for String {
    fn from(value: FileRefId) -> Self {
        value.to_string()
    }
}

fn validate_tenant(tenant_id: &str) -> Result<(), CoreError> {
    if tenant_id.is_empty() || tenant_id.contains(':') {
        return Err(CoreError::InvalidKey(format!("bad tenant id: {tenant_id:?}")));
    }
    Ok(())
}
