// Election stance categories
//
// The stance survey uses its own vocabulary ("Raised questions",
// "Avoided answering"...). Every label folds into one of five categories.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stance {
    FullyDenied,
    AcceptedWithConcerns,
    Accepted,
    Ambiguous,
    NoComment,
}

impl Stance {
    pub const ALL: [Stance; 5] = [
        Stance::FullyDenied,
        Stance::AcceptedWithConcerns,
        Stance::Accepted,
        Stance::Ambiguous,
        Stance::NoComment,
    ];

    /// Stored label (also what the CHECK constraint accepts)
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::FullyDenied => "Fully Denied",
            Stance::AcceptedWithConcerns => "Accepted with concerns",
            Stance::Accepted => "Accepted",
            Stance::Ambiguous => "Ambiguous",
            Stance::NoComment => "No comment",
        }
    }

    pub fn from_label(label: &str) -> Option<Stance> {
        let normalized = label
            .trim()
            .to_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "fully denied" | "denied" => Some(Stance::FullyDenied),
            "accepted with concerns" | "accepted with reservations" | "raised questions" => {
                Some(Stance::AcceptedWithConcerns)
            }
            "accepted" | "fully accepted" => Some(Stance::Accepted),
            "ambiguous" | "avoided answering" => Some(Stance::Ambiguous),
            "no comment" | "no response" => Some(Stance::NoComment),
            _ => None,
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
