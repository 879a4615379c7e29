//! Priority arbitration between channel states

use std::collections::HashMap;

use super::channels::VisualState;

/// Static ranking of states; higher wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable(HashMap<VisualState, u32>);

impl PriorityTable {
    pub fn new(entries: HashMap<VisualState, u32>) -> Self {
        Self(entries)
    }

    /// Priority of a state; states absent from the table rank as 0
    pub fn priority(&self, state: VisualState) -> u32 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    /// States that have no explicit entry
    pub fn missing(&self) -> Vec<VisualState> {
        VisualState::ALL
            .into_iter()
            .filter(|state| !self.0.contains_key(state))
            .collect()
    }

    /// Give every missing state an explicit 0 entry
    pub fn fill_missing(&mut self) {
        for state in VisualState::ALL {
            self.0.entry(state).or_insert(0);
        }
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self(HashMap::from([
            (VisualState::Idle, 0),
            (VisualState::Talk, 1),
            (VisualState::Wasd, 2),
            (VisualState::Mouse, 3),
            (VisualState::Scream, 4),
        ]))
    }
}

/// Pick the winning state
///
/// Candidates are given in `[voice, keys, mouse]` order. A later
/// candidate only displaces the current best when its priority is
/// strictly higher, so equal priorities go to the earlier channel.
pub fn resolve(table: &PriorityTable, candidates: [VisualState; 3]) -> VisualState {
    let mut best: Option<(VisualState, u32)> = None;

    for state in candidates {
        let priority = table.priority(state);
        match best {
            Some((_, best_priority)) if priority <= best_priority => {}
            _ => best = Some((state, priority)),
        }
    }

    best.map(|(state, _)| state).unwrap_or_default()
}
