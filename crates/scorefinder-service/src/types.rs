//! Types of the Score Finder API.
//!
//! These (de)serialize to/from the JSON bodies of the HTTP endpoints and are what the service
//! keeps in its cache.

use serde::{Deserialize, Serialize};

/// A competitor suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: String,
    pub name: String,
}

/// A competition, as listed by the competitions endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub name: String,
}

/// A style suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub name: String,
}

/// The filters of a score search.
///
/// All filters are optional and combined with "and".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Part of the competitor name, case-insensitive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitor: Option<String>,
    /// Part of the style name, case-insensitive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Part of the judge name, case-insensitive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<String>,
    /// A comma separated list of exact competition names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competition: Option<String>,
    /// The score a single judge gave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    /// The final placement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<i64>,
}

impl SearchFilters {
    /// Trims all text filters and drops the empty ones.
    pub fn normalized(self) -> Self {
        fn text(filter: Option<String>) -> Option<String> {
            let filter = filter?;
            let trimmed = filter.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }

        Self {
            competitor: text(self.competitor),
            style: text(self.style),
            judge: text(self.judge),
            competition: text(self.competition),
            score: self.score,
            overall_score: self.overall_score,
        }
    }

    /// The individual competition names of the `competition` filter.
    pub fn competition_names(&self) -> Option<Vec<&str>> {
        let names = self.competition.as_deref()?;
        Some(
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect(),
        )
    }
}

/// A single row of the search results.
///
/// Every combination of competitor, style and competition appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRow {
    pub placement: Option<i64>,
    pub person_name: String,
    pub style_name: String,
    pub comp_name: String,
}

/// The number of entries a competitor danced at one competition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub competition_name: String,
    pub total_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized() {
        let filters = SearchFilters {
            competitor: Some("  Alice ".into()),
            style: Some("   ".into()),
            judge: Some(String::new()),
            score: Some(1),
            ..Default::default()
        }
        .normalized();

        assert_eq!(
            filters,
            SearchFilters {
                competitor: Some("Alice".into()),
                score: Some(1),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_competition_names() {
        let filters = SearchFilters {
            competition: Some("Ohio Star Ball 2023, ,Emerald Ball 2024".into()),
            ..Default::default()
        };
        assert_eq!(
            filters.competition_names().unwrap(),
            ["Ohio Star Ball 2023", "Emerald Ball 2024"]
        );
        assert_eq!(SearchFilters::default().competition_names(), None);
    }
}
