use crate::models::Assignment;
use crate::plan::SearchPlan;
use crate::SearchError;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Fresh,
    At(Assignment),
    Exhausted,
}

/// Odometer over the Cartesian product of the plan's dimensions.
///
/// Dimension 0 varies slowest and the last dimension fastest. Leaves that
/// start with a pruned prefix are never produced.
#[derive(Debug, Clone)]
pub struct Enumerator {
    radices: Vec<usize>,
    pruned: BTreeSet<Vec<usize>>,
    cursor: Cursor,
}

impl Enumerator {
    pub fn new(radices: Vec<usize>) -> Self {
        Self {
            radices,
            pruned: BTreeSet::new(),
            cursor: Cursor::Fresh,
        }
    }

    pub fn for_plan(plan: &SearchPlan) -> Self {
        Self::new(plan.radices())
    }

    /// Re-applies prefixes pruned in an earlier session.
    pub fn with_pruned(mut self, prefixes: impl IntoIterator<Item = Assignment>) -> Self {
        self.pruned
            .extend(prefixes.into_iter().map(|prefix| prefix.indices().to_vec()));
        self
    }

    /// Size of the unpruned product space.
    pub fn total(&self) -> u64 {
        if self.radices.is_empty() {
            return 0;
        }
        self.radices
            .iter()
            .fold(1u64, |product, radix| product.saturating_mul(*radix as u64))
    }

    pub fn current(&self) -> Option<&Assignment> {
        match &self.cursor {
            Cursor::At(assignment) => Some(assignment),
            _ => None,
        }
    }

    pub fn pruned(&self) -> Vec<Assignment> {
        self.pruned.iter().cloned().map(Assignment::new).collect()
    }

    fn space_is_empty(&self) -> bool {
        self.radices.is_empty() || self.radices.contains(&0)
    }

    pub fn first(&self) -> Option<Assignment> {
        if self.space_is_empty() {
            return None;
        }
        let mut indices = vec![0; self.radices.len()];
        self.skip_pruned(&mut indices)
            .then(|| Assignment::new(indices))
    }

    /// The leaf after `current` in enumeration order, or `None` once the space is covered.
    pub fn advance(&self, current: &Assignment) -> Option<Assignment> {
        if self.space_is_empty() || current.depth() != self.radices.len() {
            return None;
        }
        let mut indices = current.indices().to_vec();
        let last = indices.len() - 1;
        if !self.step(&mut indices, last) {
            return None;
        }
        self.skip_pruned(&mut indices)
            .then(|| Assignment::new(indices))
    }

    pub fn next_assignment(&mut self) -> Option<Assignment> {
        let next = match &self.cursor {
            Cursor::Fresh => self.first(),
            Cursor::At(current) => self.advance(current),
            Cursor::Exhausted => None,
        };

        match next {
            Some(assignment) => {
                self.cursor = Cursor::At(assignment.clone());
                Some(assignment)
            }
            None => {
                self.cursor = Cursor::Exhausted;
                None
            }
        }
    }

    /// Marks the current leaf's prefix `0..=depth` as exhausted.
    ///
    /// The next advance moves straight to the following value at `depth`
    /// (carrying into shallower dimensions as needed). Returns the pruned
    /// prefix, or `None` when there is no current leaf.
    pub fn prune(&mut self, depth: usize) -> Option<Assignment> {
        let current = self.current()?;
        let prefix = current.prefix(depth);
        self.pruned.insert(prefix.indices().to_vec());
        Some(prefix)
    }

    /// Continues enumeration exactly after `assignment`.
    pub fn resume_from(&mut self, assignment: &Assignment) -> Result<(), SearchError> {
        if assignment.depth() != self.radices.len() {
            return Err(SearchError::InvalidAssignment(format!(
                "{assignment} covers {} dimensions, plan has {}",
                assignment.depth(),
                self.radices.len()
            )));
        }

        let out_of_range = assignment
            .indices()
            .iter()
            .zip(&self.radices)
            .position(|(index, radix)| index >= radix);
        if let Some(dimension) = out_of_range {
            return Err(SearchError::InvalidAssignment(format!(
                "{assignment} index out of range for dimension {dimension}"
            )));
        }

        self.cursor = Cursor::At(assignment.clone());
        Ok(())
    }

    /// Increments the odometer at `position`, zeroing deeper positions.
    fn step(&self, indices: &mut [usize], mut position: usize) -> bool {
        for deeper in indices.iter_mut().skip(position + 1) {
            *deeper = 0;
        }
        loop {
            indices[position] += 1;
            if indices[position] < self.radices[position] {
                return true;
            }
            indices[position] = 0;
            if position == 0 {
                return false;
            }
            position -= 1;
        }
    }

    fn skip_pruned(&self, indices: &mut [usize]) -> bool {
        while let Some(depth) = self.pruned_depth(indices) {
            if !self.step(indices, depth) {
                return false;
            }
        }
        true
    }

    /// Shallowest depth at which `indices` falls under a pruned prefix.
    fn pruned_depth(&self, indices: &[usize]) -> Option<usize> {
        if self.pruned.is_empty() {
            return None;
        }
        (0..indices.len()).find(|depth| self.pruned.contains(&indices[..=*depth]))
    }
}

impl Iterator for Enumerator {
    type Item = Assignment;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_assignment()
    }
}
