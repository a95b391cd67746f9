use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Binary credit decision. `Accept` is the favorable outcome for an applicant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[default]
    Reject,
    Accept,
}

impl Decision {
    pub fn as_u8(&self) -> u8 {
        match self {
            Decision::Reject => 0,
            Decision::Accept => 1,
        }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.as_u8())
    }

    /// Maps a {0,1} label onto a decision; anything non-zero is `Accept`.
    pub fn from_label(label: u8) -> Self {
        if label == 0 {
            Decision::Reject
        } else {
            Decision::Accept
        }
    }

    pub fn matches(&self, label: u8) -> bool {
        self.as_u8() == label
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Reject => "reject",
            Decision::Accept => "accept",
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" | "0" => Ok(Decision::Reject),
            "accept" | "1" => Ok(Decision::Accept),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}
