use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::domain::AdmissionStage;

/// How an application leaves a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progression {
    /// Advanced by the batch progressor.
    Auto,
    /// Requires a staff member to advance the application explicitly.
    Manual,
}

/// Row of the admissions transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    pub stage: AdmissionStage,
    pub title: &'static str,
    pub next: Option<AdmissionStage>,
    pub progression: Progression,
}

impl StageDefinition {
    pub const fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    pub const fn auto_progress(&self) -> bool {
        matches!(self.progression, Progression::Auto)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("stage catalog is empty")]
    Empty,
    #[error("stage {0} is defined more than once")]
    Duplicate(AdmissionStage),
    #[error("draft cannot be part of the stage catalog")]
    DraftDefined,
    #[error("stage {from} points at undefined successor {to}")]
    UndefinedSuccessor {
        from: AdmissionStage,
        to: AdmissionStage,
    },
    #[error("stage catalog needs exactly one terminal stage, found {0}")]
    TerminalCount(usize),
    #[error("stage chain starting at {0} loops back on itself")]
    Cycle(AdmissionStage),
    #[error("stage {0} is unreachable from the initial stage")]
    Unreachable(AdmissionStage),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("draft applications cannot be progressed")]
    Draft,
    #[error("stage {0} is not part of the admissions catalog")]
    UnknownStage(AdmissionStage),
    #[error("stage {0} is terminal")]
    Terminal(AdmissionStage),
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: AdmissionStage,
        to: AdmissionStage,
    },
}

/// Validated, immutable transition table for the admissions pipeline.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    definitions: Vec<StageDefinition>,
    index: HashMap<AdmissionStage, usize>,
    initial: AdmissionStage,
}

impl StageCatalog {
    /// Validate `definitions` and build the lookup index. The first row is the initial stage.
    pub fn new(definitions: Vec<StageDefinition>) -> Result<Self, CatalogError> {
        let initial = definitions.first().ok_or(CatalogError::Empty)?.stage;

        let mut index = HashMap::with_capacity(definitions.len());
        for (position, definition) in definitions.iter().enumerate() {
            if definition.stage == AdmissionStage::Draft {
                return Err(CatalogError::DraftDefined);
            }
            if index.insert(definition.stage, position).is_some() {
                return Err(CatalogError::Duplicate(definition.stage));
            }
        }

        for definition in &definitions {
            if let Some(next) = definition.next {
                if !index.contains_key(&next) {
                    return Err(CatalogError::UndefinedSuccessor {
                        from: definition.stage,
                        to: next,
                    });
                }
            }
        }

        let terminals = definitions.iter().filter(|def| def.is_terminal()).count();
        if terminals != 1 {
            return Err(CatalogError::TerminalCount(terminals));
        }

        let mut visited = HashSet::with_capacity(definitions.len());
        let mut cursor = Some(initial);
        while let Some(stage) = cursor {
            if !visited.insert(stage) {
                return Err(CatalogError::Cycle(stage));
            }
            cursor = definitions[index[&stage]].next;
        }

        if let Some(orphan) = definitions
            .iter()
            .find(|definition| !visited.contains(&definition.stage))
        {
            return Err(CatalogError::Unreachable(orphan.stage));
        }

        Ok(Self {
            definitions,
            index,
            initial,
        })
    }

    pub fn standard() -> Self {
        // Exercised by `standard_catalog_validates`.
        match Self::new(standard_stage_definitions()) {
            Ok(catalog) => catalog,
            Err(err) => unreachable!("standard stage catalog is invalid: {err}"),
        }
    }

    pub fn initial(&self) -> AdmissionStage {
        self.initial
    }

    pub fn lookup(&self, stage: AdmissionStage) -> Option<&StageDefinition> {
        self.index
            .get(&stage)
            .map(|position| &self.definitions[*position])
    }

    pub fn lookup_key(&self, key: &str) -> Option<&StageDefinition> {
        AdmissionStage::from_key(key).and_then(|stage| self.lookup(stage))
    }

    pub fn successor_of(&self, stage: AdmissionStage) -> Option<&StageDefinition> {
        self.lookup(stage)
            .and_then(|definition| definition.next)
            .and_then(|next| self.lookup(next))
    }

    pub fn is_auto(&self, stage: AdmissionStage) -> bool {
        self.lookup(stage)
            .map(StageDefinition::auto_progress)
            .unwrap_or(false)
    }

    /// Resolve the only legal next stage for an application currently at `current`.
    pub fn advance(&self, current: AdmissionStage) -> Result<&StageDefinition, TransitionError> {
        if current == AdmissionStage::Draft {
            return Err(TransitionError::Draft);
        }
        let definition = self
            .lookup(current)
            .ok_or(TransitionError::UnknownStage(current))?;
        definition
            .next
            .and_then(|next| self.lookup(next))
            .ok_or(TransitionError::Terminal(current))
    }

    pub fn validate_transition(
        &self,
        from: AdmissionStage,
        to: AdmissionStage,
    ) -> Result<&StageDefinition, TransitionError> {
        let next = self.advance(from)?;
        if next.stage == to {
            Ok(next)
        } else {
            Err(TransitionError::IllegalTransition { from, to })
        }
    }

    /// Stage definitions in pipeline order, starting at the initial stage.
    pub fn ordered(&self) -> Vec<&StageDefinition> {
        let mut ordered = Vec::with_capacity(self.definitions.len());
        let mut cursor = self.lookup(self.initial);
        while let Some(definition) = cursor {
            ordered.push(definition);
            cursor = definition.next.and_then(|next| self.lookup(next));
        }
        ordered
    }
}

fn standard_stage_definitions() -> Vec<StageDefinition> {
    vec![
        StageDefinition {
            stage: AdmissionStage::Submitted,
            title: "Application Submitted",
            next: Some(AdmissionStage::UnderReview),
            progression: Progression::Auto,
        },
        StageDefinition {
            stage: AdmissionStage::UnderReview,
            title: "Under Review",
            next: Some(AdmissionStage::AssessmentScheduled),
            progression: Progression::Manual,
        },
        StageDefinition {
            stage: AdmissionStage::AssessmentScheduled,
            title: "Assessment Scheduled",
            next: Some(AdmissionStage::Approved),
            progression: Progression::Manual,
        },
        StageDefinition {
            stage: AdmissionStage::Approved,
            title: "Approved",
            next: Some(AdmissionStage::OfferSent),
            progression: Progression::Auto,
        },
        StageDefinition {
            stage: AdmissionStage::OfferSent,
            title: "Offer Sent",
            next: Some(AdmissionStage::OfferAccepted),
            progression: Progression::Auto,
        },
        StageDefinition {
            stage: AdmissionStage::OfferAccepted,
            title: "Offer Accepted",
            next: Some(AdmissionStage::Enrolled),
            progression: Progression::Manual,
        },
        StageDefinition {
            stage: AdmissionStage::Enrolled,
            title: "Enrolled",
            next: None,
            progression: Progression::Manual,
        },
    ]
}

#[cfg(test)]
pub(crate) fn standard_definitions_for_tests() -> Vec<StageDefinition> {
    standard_stage_definitions()
}
