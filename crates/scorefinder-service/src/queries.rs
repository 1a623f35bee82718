//! The data processing behind the individual queries.
//!
//! Everything in here is synchronous and works on documents that were already loaded, the
//! [`ScoreService`](crate::service::ScoreService) takes care of loading and caching.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::lookups::NameMap;
use crate::store::Document;
use crate::types::{Competition, Competitor, HistoryEntry, SearchFilters, SearchRow, Style};

/// The maximum number of autocomplete suggestions.
pub const MAX_SUGGESTIONS: usize = 10;

/// How many people are scanned for competitor suggestions.
pub const COMPETITOR_SCAN_LIMIT: usize = 500;

/// How many styles are scanned for style suggestions.
pub const STYLE_SCAN_LIMIT: usize = 200;

const UNKNOWN: &str = "Unknown";

/// Case-insensitive substring matching.
#[derive(Debug)]
pub struct Matcher(String);

impl Matcher {
    pub fn new(query: &str) -> Self {
        Self(query.to_lowercase())
    }

    pub fn matches(&self, name: &str) -> bool {
        name.to_lowercase().contains(&self.0)
    }

    pub fn is_prefix_of(&self, name: &str) -> bool {
        name.to_lowercase().starts_with(&self.0)
    }
}

/// A score a single judge gave to one competitor in one style at one competition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub id: String,
    pub people_id: String,
    pub style_id: String,
    pub comp_id: String,
    pub judge_id: String,
    pub score: Option<i64>,
    pub overall_score: Option<i64>,
}

impl Score {
    /// Reads a score from its document. Documents missing any reference are skipped.
    pub fn from_document(document: &Document) -> Option<Self> {
        let reference = |field: &str| document.str(field).map(str::to_owned);
        let score = Score {
            id: document.id.clone(),
            people_id: reference("people_id")?,
            style_id: reference("style_id")?,
            comp_id: reference("comp_id")?,
            judge_id: reference("judge_id")?,
            score: document.int("score"),
            overall_score: document.int("overall_score"),
        };
        Some(score)
    }

    /// The dance entry this score belongs to.
    fn entry(&self) -> (&str, &str, &str) {
        (&self.people_id, &self.style_id, &self.comp_id)
    }
}

/// Parses all score documents, logging the malformed ones.
pub fn parse_scores(documents: &[Document]) -> Vec<Score> {
    documents
        .iter()
        .filter_map(|document| {
            let score = Score::from_document(document);
            if score.is_none() {
                tracing::debug!(id = %document.id, "Skipping malformed score");
            }
            score
        })
        .collect()
}

/// Competitor suggestions: people whose name contains `query`.
pub fn competitors(people: &[Document], query: &str) -> Vec<Competitor> {
    let matcher = Matcher::new(query);
    people
        .iter()
        .filter_map(|person| {
            let name = person.name()?;
            matcher.matches(name).then(|| Competitor {
                id: person.id.clone(),
                name: name.to_owned(),
            })
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}

/// Style suggestions: styles whose name contains `query`.
pub fn styles(styles: &[Document], query: &str) -> Vec<Style> {
    let matcher = Matcher::new(query);
    styles
        .iter()
        .filter_map(Document::name)
        .filter(|name| matcher.matches(name))
        .take(MAX_SUGGESTIONS)
        .map(|name| Style {
            name: name.to_owned(),
        })
        .collect()
}

/// Judge suggestions: judges whose name contains `query`, the ones starting with it first.
pub fn judges(judges: &[Document], query: &str) -> Vec<String> {
    let matcher = Matcher::new(query);
    let (prefixed, other): (Vec<&str>, Vec<&str>) = judges
        .iter()
        .filter_map(Document::name)
        .filter(|name| matcher.matches(name))
        .partition(|name| matcher.is_prefix_of(name));

    prefixed
        .into_iter()
        .chain(other)
        .take(MAX_SUGGESTIONS)
        .map(str::to_owned)
        .collect()
}

/// A year from 1900 to 2099 between ASCII word boundaries.
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u:\b)(?:19|20)[0-9]{2}(?-u:\b)").unwrap());

/// Extracts the year from a competition name like "Ohio Star Ball 2023".
///
/// Only standalone four digit numbers from 1900 to 2099 count. Non-ASCII letters do not
/// attach to a number, so "Déjà2023" has a year.
pub fn year_of(name: &str) -> Option<u32> {
    YEAR_RE.find(name)?.as_str().parse().ok()
}

/// Orders competition names by year, most recent first, then alphabetically.
///
/// Names without a year go last.
pub fn compare_competitions(a: &str, b: &str) -> Ordering {
    let year = |name: &str| year_of(name).unwrap_or(0);
    year(b)
        .cmp(&year(a))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

/// All named competitions, sorted with [`compare_competitions`].
pub fn competitions(documents: &[Document]) -> Vec<Competition> {
    let mut competitions: Vec<_> = documents
        .iter()
        .filter_map(|document| {
            Some(Competition {
                id: document.id.clone(),
                name: document.name()?.to_owned(),
            })
        })
        .collect();
    competitions.sort_by(|a, b| compare_competitions(&a.name, &b.name));
    competitions
}

/// Ids of the documents whose name is one of `names` exactly.
pub fn ids_by_exact_name(documents: &[Document], names: &[&str]) -> FxHashSet<String> {
    documents
        .iter()
        .filter(|document| document.name().is_some_and(|name| names.contains(&name)))
        .map(|document| document.id.clone())
        .collect()
}

/// Ids of the documents whose name contains `query`.
pub fn ids_by_name(documents: &[Document], query: &str) -> FxHashSet<String> {
    let matcher = Matcher::new(query);
    documents
        .iter()
        .filter(|document| document.name().is_some_and(|name| matcher.matches(name)))
        .map(|document| document.id.clone())
        .collect()
}

/// Filters to apply to scores before any names are resolved.
#[derive(Debug, Default)]
pub struct ScoreFilter {
    pub comp_ids: Option<FxHashSet<String>>,
    pub judge_ids: Option<FxHashSet<String>>,
    pub people_ids: Option<FxHashSet<String>>,
    pub score: Option<i64>,
    pub overall_score: Option<i64>,
}

impl ScoreFilter {
    /// Takes the numeric filters from `filters`, the id filters are resolved separately.
    pub fn new(filters: &SearchFilters) -> Self {
        Self {
            score: filters.score,
            overall_score: filters.overall_score,
            ..Default::default()
        }
    }

    pub fn matches(&self, score: &Score) -> bool {
        fn contains(ids: &Option<FxHashSet<String>>, id: &str) -> bool {
            ids.as_ref().is_none_or(|ids| ids.contains(id))
        }

        contains(&self.comp_ids, &score.comp_id)
            && contains(&self.judge_ids, &score.judge_id)
            && contains(&self.people_ids, &score.people_id)
            && self.score.is_none_or(|s| score.score == Some(s))
            && self
                .overall_score
                .is_none_or(|s| score.overall_score == Some(s))
    }
}

/// Resolved names of everything the search results reference.
#[derive(Debug, Clone, Copy)]
pub struct Names<'a> {
    pub people: &'a NameMap,
    pub styles: &'a NameMap,
    pub competitions: &'a NameMap,
}

fn resolve<'m>(map: &'m NameMap, id: &str) -> &'m str {
    map.get(id).map_or(UNKNOWN, String::as_str)
}

/// Keeps only the scores whose competitor and style names contain the given filters.
pub fn filter_by_names(
    scores: Vec<Score>,
    filters: &SearchFilters,
    names: &Names<'_>,
) -> Vec<Score> {
    let competitor = filters.competitor.as_deref().map(Matcher::new);
    let style = filters.style.as_deref().map(Matcher::new);

    let name_matches = |matcher: &Option<Matcher>, map: &NameMap, id: &str| match matcher {
        Some(matcher) => map.get(id).is_some_and(|name| matcher.matches(name)),
        None => true,
    };

    scores
        .into_iter()
        .filter(|score| {
            name_matches(&competitor, names.people, &score.people_id)
                && name_matches(&style, names.styles, &score.style_id)
        })
        .collect()
}

/// Turns scores into search rows, one per competitor, style and competition.
///
/// Rows keep the order in which their first score appears. The placement is taken from that
/// first score as well.
pub fn search_rows(scores: &[Score], names: &Names<'_>) -> Vec<SearchRow> {
    let mut seen = FxHashSet::default();
    let mut rows = Vec::new();

    for score in scores {
        let row = SearchRow {
            placement: score.overall_score,
            person_name: resolve(names.people, &score.people_id).to_owned(),
            style_name: resolve(names.styles, &score.style_id).to_owned(),
            comp_name: resolve(names.competitions, &score.comp_id).to_owned(),
        };
        let group = (
            row.person_name.clone(),
            row.style_name.clone(),
            row.comp_name.clone(),
        );
        if seen.insert(group) {
            rows.push(row);
        }
    }

    rows
}

/// Counts the distinct dance entries per competition.
///
/// Competitions are sorted with [`compare_competitions`].
pub fn competition_history(scores: &[Score], competitions: &NameMap) -> Vec<HistoryEntry> {
    let mut entries = FxHashSet::default();
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();

    for score in scores {
        if entries.insert(score.entry()) {
            let name = competitions
                .get(&score.comp_id)
                .map_or("Unknown Competition", String::as_str);
            *counts.entry(name).or_default() += 1;
        }
    }

    let mut history: Vec<_> = counts
        .into_iter()
        .map(|(name, total_entries)| HistoryEntry {
            competition_name: name.to_owned(),
            total_entries,
        })
        .collect();
    history.sort_by(|a, b| compare_competitions(&a.competition_name, &b.competition_name));
    history
}
