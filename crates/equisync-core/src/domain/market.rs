use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// National equity venue grouping handled by one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Tw,
    Us,
    Cn,
    Hk,
    Jp,
    Kr,
}

impl Market {
    /// Every market, in the order a full run processes them.
    pub const ALL: [Self; 6] = [Self::Tw, Self::Us, Self::Cn, Self::Hk, Self::Jp, Self::Kr];

    pub const fn code(self) -> &'static str {
        match self {
            Self::Tw => "tw",
            Self::Us => "us",
            Self::Cn => "cn",
            Self::Hk => "hk",
            Self::Jp => "jp",
            Self::Kr => "kr",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Tw => "Taiwan",
            Self::Us => "United States",
            Self::Cn => "China A-shares",
            Self::Hk => "Hong Kong",
            Self::Jp => "Japan",
            Self::Kr => "Korea",
        }
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        let code = normalized
            .strip_suffix("-share")
            .unwrap_or(normalized.as_str());
        Self::ALL
            .into_iter()
            .find(|market| market.code() == code)
            .ok_or_else(|| ValidationError::UnknownMarket {
                value: input.to_owned(),
            })
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
