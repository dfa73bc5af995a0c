//! Tariff tiers and their capability table.
//!
//! Tiers are a closed enum consulted through a single lookup
//! (`Tariff::policy`) instead of scattered conditionals.

use serde::{Deserialize, Serialize};

/// Purchased access level, ordered from lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tariff {
    /// Content only, no human review.
    Basic,
    /// Content + reviewer feedback on assignments.
    Feedback,
    /// Feedback + premium community access.
    Premium,
    /// Premium + professional practice sessions.
    Practic,
}

/// Community groups a tariff may grant access to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    General,
    Premium,
}

/// What a tariff entitles the user to.
#[derive(Clone, Copy, Debug)]
pub struct TariffPolicy {
    /// Whether free-text submissions are routed to human reviewers.
    pub review_entitled: bool,
    /// Price in minor currency units (kopecks/cents).
    pub price_minor: u64,
    pub group_access: &'static [Group],
}

impl Tariff {
    pub fn policy(self) -> TariffPolicy {
        match self {
            Tariff::Basic => TariffPolicy {
                review_entitled: false,
                price_minor: 490_000,
                group_access: &[Group::General],
            },
            Tariff::Feedback => TariffPolicy {
                review_entitled: true,
                price_minor: 990_000,
                group_access: &[Group::General],
            },
            Tariff::Premium => TariffPolicy {
                review_entitled: true,
                price_minor: 1_990_000,
                group_access: &[Group::General, Group::Premium],
            },
            Tariff::Practic => TariffPolicy {
                review_entitled: true,
                price_minor: 2_990_000,
                group_access: &[Group::General, Group::Premium],
            },
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Some(Tariff::Basic),
            "feedback" => Some(Tariff::Feedback),
            "premium" => Some(Tariff::Premium),
            "practic" => Some(Tariff::Practic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tariff::Basic => "basic",
            Tariff::Feedback => "feedback",
            Tariff::Premium => "premium",
            Tariff::Practic => "practic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_basic_skips_review() {
        assert!(!Tariff::Basic.policy().review_entitled);
        assert!(Tariff::Feedback.policy().review_entitled);
        assert!(Tariff::Premium.policy().review_entitled);
        assert!(Tariff::Practic.policy().review_entitled);
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(Tariff::Basic < Tariff::Feedback);
        assert!(Tariff::Feedback < Tariff::Premium);
        assert!(Tariff::Premium < Tariff::Practic);
    }

    #[test]
    fn parse_round_trips() {
        for t in [
            Tariff::Basic,
            Tariff::Feedback,
            Tariff::Premium,
            Tariff::Practic,
        ] {
            assert_eq!(Tariff::parse(t.as_str()), Some(t));
        }
        assert_eq!(Tariff::parse("gold"), None);
    }
}
