//! Task identifiers for the two classification heads

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the two supervised tasks sharing the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Task 1: binary disaster classification
    Disaster,
    /// Task 2: three-way sentiment classification
    Sentiment,
}

impl Task {
    /// Both tasks in head order
    pub const ALL: [Task; 2] = [Task::Disaster, Task::Sentiment];

    /// Number of output classes of this task's head
    pub fn num_classes(self) -> usize {
        match self {
            Task::Disaster => 2,
            Task::Sentiment => 3,
        }
    }

    /// Numeric selector (1 or 2)
    pub fn id(self) -> u8 {
        match self {
            Task::Disaster => 1,
            Task::Sentiment => 2,
        }
    }

    /// Prefix used for emitted metric names
    pub fn metric_prefix(self) -> &'static str {
        match self {
            Task::Disaster => "d1",
            Task::Sentiment => "d2",
        }
    }
}

impl TryFrom<u8> for Task {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self> {
        match selector {
            1 => Ok(Task::Disaster),
            2 => Ok(Task::Sentiment),
            other => Err(Error::InvalidTaskSelector(other)),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Disaster => write!(f, "disaster"),
            Task::Sentiment => write!(f, "sentiment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, Task::Disaster ; "task one")]
    #[test_case(2, Task::Sentiment ; "task two")]
    fn test_valid_selectors(selector: u8, expected: Task) {
        let task = Task::try_from(selector).unwrap();
        assert_eq!(task, expected);
        assert_eq!(task.id(), selector);
    }

    #[test_case(0)]
    #[test_case(3)]
    #[test_case(255)]
    fn test_invalid_selector_is_fatal(selector: u8) {
        let err = Task::try_from(selector).unwrap_err();
        assert!(matches!(err, Error::InvalidTaskSelector(s) if s == selector));
        assert!(err.to_string().contains(&selector.to_string()));
    }

    #[test]
    fn test_class_counts() {
        assert_eq!(Task::Disaster.num_classes(), 2);
        assert_eq!(Task::Sentiment.num_classes(), 3);
        assert_eq!(Task::Disaster.metric_prefix(), "d1");
    }
}
