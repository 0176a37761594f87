use crate::models::{Assignment, FilterDimension, FilterParam};
use crate::PlanError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The ordered filter dimensions of one lookup form, coarse to fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchPlan {
    pub dimensions: Vec<FilterDimension>,
}

impl SearchPlan {
    pub fn new(dimensions: Vec<FilterDimension>) -> Result<Self, PlanError> {
        let plan = Self { dimensions };
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PlanError> {
        let plan: SearchPlan = serde_json::from_str(raw)?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for (position, dimension) in self.dimensions.iter().enumerate() {
            if dimension.name.trim().is_empty() {
                return Err(PlanError::EmptyName(position));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(PlanError::DuplicateDimension(dimension.name.clone()));
            }
        }
        Ok(())
    }

    /// Value count per dimension, in plan order.
    pub fn radices(&self) -> Vec<usize> {
        self.dimensions
            .iter()
            .map(|dimension| dimension.values.len())
            .collect()
    }

    /// Restricts dimension `name` to the single candidate matching `value`.
    ///
    /// Matching ignores case and surrounding whitespace; the stored value keeps
    /// the spelling from the plan.
    pub fn pin(&mut self, name: &str, value: &str) -> Result<(), PlanError> {
        let dimension = self
            .dimensions
            .iter_mut()
            .find(|dimension| dimension.name == name || dimension.field() == name)
            .ok_or_else(|| PlanError::UnknownDimension(name.to_string()))?;

        let wanted = value.trim().to_uppercase();
        let chosen = dimension
            .values
            .iter()
            .find(|candidate| candidate.trim().to_uppercase() == wanted)
            .cloned()
            .ok_or_else(|| PlanError::UnknownValue {
                dimension: dimension.name.clone(),
                value: value.to_string(),
            })?;

        dimension.values = vec![chosen];
        Ok(())
    }

    /// Applies a `name=value` pin as typed on the command line.
    pub fn pin_spec(&mut self, spec: &str) -> Result<(), PlanError> {
        let (name, value) = spec
            .split_once('=')
            .filter(|(name, value)| !name.trim().is_empty() && !value.trim().is_empty())
            .ok_or_else(|| PlanError::InvalidPin(spec.to_string()))?;
        self.pin(name.trim(), value)
    }

    /// SHA-256 over the canonical JSON of the dimensions.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.dimensions).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    /// Resolves an assignment (or prefix) to the form parameters it selects.
    ///
    /// Indices outside the plan are skipped.
    pub fn params(&self, assignment: &Assignment) -> Vec<FilterParam> {
        self.dimensions
            .iter()
            .zip(assignment.indices())
            .filter_map(|(dimension, index)| {
                dimension.values.get(*index).map(|value| FilterParam {
                    field: dimension.field().to_string(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    pub fn describe(&self, assignment: &Assignment) -> String {
        let values = self
            .params(assignment)
            .into_iter()
            .map(|param| param.value)
            .collect::<Vec<_>>()
            .join(", ");
        format!("({values})")
    }
}
