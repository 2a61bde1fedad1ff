use async_trait::async_trait;

use super::domain::{AdmissionStage, Application, ApplicationId, AuxiliaryData, FeeStructure};

/// Partial update applied to a stored application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationPatch {
    pub stage: Option<AdmissionStage>,
    pub data: Option<AuxiliaryData>,
}

impl ApplicationPatch {
    /// Apply the patch and bump the version, mirroring what a store does on write.
    pub fn apply_to(self, application: &mut Application) {
        if let Some(stage) = self.stage {
            application.stage = stage;
        }
        if let Some(data) = self.data {
            application.data = data;
        }
        application.version += 1;
    }
}

/// Storage abstraction for admission applications.
///
/// `update` is a compare-and-swap: implementations must reject the write with
/// [`RepositoryError::VersionMismatch`] when the stored version differs from
/// `expected_version`, and increment the version on success.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn insert(&self, application: Application) -> Result<Application, RepositoryError>;
    async fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;
    /// Every non-draft application, most recently submitted first.
    async fn active(&self) -> Result<Vec<Application>, RepositoryError>;
    async fn update(
        &self,
        id: &ApplicationId,
        expected_version: u64,
        patch: ApplicationPatch,
    ) -> Result<Application, RepositoryError>;
}

/// Lookup of the fee structure that applies to a new student.
#[async_trait]
pub trait FeeStructureCatalog: Send + Sync {
    async fn active_structure(
        &self,
        school_id: &str,
        year_group: &str,
    ) -> Result<Option<FeeStructure>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: expected version {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
