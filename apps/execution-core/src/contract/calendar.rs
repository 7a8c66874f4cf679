//! Per-underlying expiry weekdays.
//!
//! The weekday on which an index family's weekly and monthly contracts
//! expire changes with exchange circulars, so it is configuration, not code.

use std::collections::HashMap;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Weekly and monthly expiry weekdays by underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryCalendar {
    /// Weekly expiry weekday for underlyings not listed in `weekly`.
    #[serde(default = "default_expiry_weekday")]
    pub default_weekly: Weekday,
    /// Monthly expiry weekday for underlyings not listed in `monthly`.
    #[serde(default = "default_expiry_weekday")]
    pub default_monthly: Weekday,
    /// Weekly expiry weekday overrides (uppercase underlying → weekday).
    #[serde(default)]
    pub weekly: HashMap<String, Weekday>,
    /// Monthly expiry weekday overrides (uppercase underlying → weekday).
    #[serde(default)]
    pub monthly: HashMap<String, Weekday>,
}

impl Default for ExpiryCalendar {
    fn default() -> Self {
        let families = [
            ("NIFTY", Weekday::Thu),
            ("BANKNIFTY", Weekday::Wed),
            ("FINNIFTY", Weekday::Tue),
            ("MIDCPNIFTY", Weekday::Mon),
            ("SENSEX", Weekday::Fri),
        ];
        Self {
            default_weekly: default_expiry_weekday(),
            default_monthly: default_expiry_weekday(),
            weekly: families
                .iter()
                .map(|(name, day)| ((*name).to_string(), *day))
                .collect(),
            monthly: families
                .iter()
                .map(|(name, day)| ((*name).to_string(), *day))
                .collect(),
        }
    }
}

impl ExpiryCalendar {
    /// A calendar where every underlying expires on `weekday`.
    #[must_use]
    pub fn uniform(weekday: Weekday) -> Self {
        Self {
            default_weekly: weekday,
            default_monthly: weekday,
            weekly: HashMap::new(),
            monthly: HashMap::new(),
        }
    }

    /// Override the weekly weekday for `underlying`.
    #[must_use]
    pub fn with_weekly(mut self, underlying: &str, weekday: Weekday) -> Self {
        self.weekly.insert(underlying.to_ascii_uppercase(), weekday);
        self
    }

    /// Override the monthly weekday for `underlying`.
    #[must_use]
    pub fn with_monthly(mut self, underlying: &str, weekday: Weekday) -> Self {
        self.monthly.insert(underlying.to_ascii_uppercase(), weekday);
        self
    }

    /// Weekday on which `underlying`'s weekly contracts expire.
    #[must_use]
    pub fn weekly_weekday(&self, underlying: &str) -> Weekday {
        self.weekly
            .get(underlying)
            .copied()
            .unwrap_or(self.default_weekly)
    }

    /// Weekday on which `underlying`'s monthly contracts expire.
    #[must_use]
    pub fn monthly_weekday(&self, underlying: &str) -> Weekday {
        self.monthly
            .get(underlying)
            .copied()
            .unwrap_or(self.default_monthly)
    }

    /// Underlying keys that are not uppercase ASCII letters.
    #[must_use]
    pub fn invalid_keys(&self) -> Vec<String> {
        self.weekly
            .keys()
            .chain(self.monthly.keys())
            .filter(|key| key.is_empty() || !key.chars().all(|c| c.is_ascii_uppercase()))
            .cloned()
            .collect()
    }
}

const fn default_expiry_weekday() -> Weekday {
    Weekday::Thu
}
