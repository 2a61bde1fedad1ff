use serde::{Deserialize, Serialize};

use super::batch::BatchSettings;
use super::domain::InstallmentChoice;
use super::fees::FeePolicy;

/// Tunables for the admissions workflow service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub fees: FeePolicy,
    pub batch: BatchSettings,
    /// Installment layout used when neither the caller nor the family chose one.
    pub default_installments: InstallmentChoice,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fees: FeePolicy::default(),
            batch: BatchSettings::default(),
            default_installments: InstallmentChoice::Full,
        }
    }
}
