//! Steps and the trajectory that owns them

use serde::Serialize;

/// What a step decided to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Dispatch to a registered tool with the raw input string
    Tool { name: String, input: String },

    /// Finish the run with this answer
    FinalAnswer { answer: String },

    /// The reasoning client produced no usable action
    Malformed { raw: String },
}

impl StepAction {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. })
    }
}

/// One loop iteration. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub index: usize,
    pub thought: String,
    pub action: StepAction,
    /// Tool output, or empty for a final answer
    pub observation: String,
}

/// Append-only record of one instruction's steps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trajectory {
    steps: Vec<Step>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended step will get
    pub fn next_index(&self) -> usize {
        self.steps.len()
    }

    /// Append a step, assigning its index.
    pub fn push(&mut self, thought: String, action: StepAction, observation: String) -> &Step {
        let index = self.steps.len();
        self.steps.push(Step {
            index,
            thought,
            action,
            observation,
        });
        &self.steps[index]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Whether the last step ended the run
    pub fn is_terminal(&self) -> bool {
        self.last().is_some_and(|s| s.action.is_final())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_monotonic() {
        let mut trajectory = Trajectory::new();
        for i in 0..3 {
            let step = trajectory.push(
                format!("t{i}"),
                StepAction::Tool {
                    name: "x".into(),
                    input: String::new(),
                },
                "ok".into(),
            );
            assert_eq!(step.index, i);
        }

        assert_eq!(trajectory.len(), 3);
        assert!(!trajectory.is_terminal());

        trajectory.push(
            "done".into(),
            StepAction::FinalAnswer {
                answer: "42".into(),
            },
            String::new(),
        );
        assert!(trajectory.is_terminal());
        assert_eq!(trajectory.next_index(), 4);
    }
}
