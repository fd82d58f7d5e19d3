//! State machine trait for lifecycle status enums.

use super::ValidationError;

/// Trait for status enums whose values form a directed transition graph.
///
/// Implementors list the direct edges; validation, reachability and
/// terminal detection come for free.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if `target` is a direct successor of `self`.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all direct successors of the current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs a single validated step.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Returns true if `target` can be reached through one or more steps.
    ///
    /// Used when intermediate notifications may have been missed: the
    /// skipped states are implied as long as a path exists.
    fn can_reach(&self, target: &Self) -> bool {
        let mut frontier = self.valid_transitions();
        let mut seen: Vec<Self> = Vec::new();
        while let Some(state) = frontier.pop() {
            if state == *target {
                return true;
            }
            if seen.contains(&state) {
                continue;
            }
            seen.push(state);
            frontier.extend(state.valid_transitions());
        }
        false
    }

    /// Checks if the current state has no outgoing transitions.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
