//! Web-search requirement policy.
//!
//! Whether a window needs the web-search-capable endpoint is configuration,
//! not code: deployments have run both an unconditional rule and a
//! recency-cutoff rule, so the boundary is a pluggable predicate over the
//! window. Health-aware fallback on top of the verdict lives in
//! [`crate::client::ApiClient::select_endpoint`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Predicate deciding whether a window requires live web search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchPolicy {
    /// Every window uses the web-search endpoint.
    Always,
    /// Web search only for windows that are unbounded or extend past a
    /// fixed knowledge cutoff; fully historical windows use the official
    /// endpoint.
    RecentWindow { cutoff: NaiveDate },
}

impl SearchPolicy {
    pub fn requires_web_search(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> bool {
        match self {
            SearchPolicy::Always => true,
            SearchPolicy::RecentWindow { cutoff } => match (start, end) {
                (Some(_), Some(end)) => end.date() >= *cutoff,
                // An unbounded window may reach past the cutoff.
                _ => true,
            },
        }
    }
}

impl Default for SearchPolicy {
    fn default() -> Self {
        SearchPolicy::Always
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_always_policy_is_unconditional() {
        let policy = SearchPolicy::Always;
        assert!(policy.requires_web_search(Some(dt(2010, 1, 1)), Some(dt(2010, 2, 1))));
        assert!(policy.requires_web_search(None, None));
    }

    #[test]
    fn test_recent_window_respects_cutoff() {
        let policy = SearchPolicy::RecentWindow {
            cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        // Fully historical window: official endpoint suffices.
        assert!(!policy.requires_web_search(Some(dt(2023, 1, 1)), Some(dt(2023, 12, 31))));
        // Window reaching the cutoff needs live search.
        assert!(policy.requires_web_search(Some(dt(2023, 12, 1)), Some(dt(2024, 1, 1))));
        assert!(policy.requires_web_search(Some(dt(2025, 5, 1)), Some(dt(2025, 5, 2))));
    }

    #[test]
    fn test_recent_window_treats_unbounded_as_recent() {
        let policy = SearchPolicy::RecentWindow {
            cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert!(policy.requires_web_search(None, Some(dt(2023, 1, 1))));
        assert!(policy.requires_web_search(Some(dt(2023, 1, 1)), None));
        assert!(policy.requires_web_search(None, None));
    }

    #[test]
    fn test_policy_round_trips_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            search_policy: SearchPolicy,
        }

        let parsed: Wrapper =
            toml::from_str("search_policy = { kind = \"recent_window\", cutoff = \"2024-01-01\" }")
                .unwrap();
        assert_eq!(
            parsed.search_policy,
            SearchPolicy::RecentWindow {
                cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
            }
        );

        let parsed: Wrapper = toml::from_str("search_policy = { kind = \"always\" }").unwrap();
        assert_eq!(parsed.search_policy, SearchPolicy::Always);
    }
}
