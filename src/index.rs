//! Lookup indexes compiled once from a [`Dataset`].

use std::collections::{HashMap, HashSet};

use crate::dataset::LoadError;
use crate::normalize::normalize;
use crate::types::{Dataset, LocalityRecord, ZipCounty};

const STATE_ABBR_LENGTH: usize = 2;

/// A locality plus its pre-normalized match keys
#[derive(Debug, Clone)]
struct IndexedLocality {
    record: LocalityRecord,
    normalized_counties: Vec<String>,
    terms: HashSet<String>,
}

/// Read-only lookup structures over one loaded dataset.
///
/// Records are stored once and referenced by position from both indexes.
#[derive(Debug, Clone)]
pub struct CompiledIndex {
    localities: Vec<IndexedLocality>,
    /// State abbreviation -> record positions, most specific first
    by_state: HashMap<String, Vec<usize>>,
    /// Normalized alias -> record positions, dataset order
    by_term: HashMap<String, Vec<usize>>,
    zip_to_county: HashMap<String, ZipCounty>,
    /// Normalized full state name -> abbreviation
    state_by_name: HashMap<String, String>,
}

/// Result of peeling a trailing state qualifier off user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateQualifier {
    pub state_abbr: Option<String>,
    pub remainder: String,
}

impl CompiledIndex {
    /// Build the indexes, rejecting datasets that break the per-state flag rules.
    pub fn build(dataset: Dataset) -> Result<Self, LoadError> {
        let Dataset {
            localities,
            zip_to_county,
            state_names,
        } = dataset;

        let state_by_name = state_names
            .into_iter()
            .map(|(abbr, name)| (normalize(&name), abbr))
            .collect();

        let mut indexed = Vec::with_capacity(localities.len());
        let mut by_state: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_term: HashMap<String, Vec<usize>> = HashMap::new();

        for (position, record) in localities.into_iter().enumerate() {
            if record.is_statewide && record.is_rest_of_state {
                return Err(LoadError::Invalid(format!(
                    "locality {} {} is flagged both statewide and rest-of-state",
                    record.state_abbr, record.locality_number
                )));
            }

            let normalized_counties = record.counties.iter().map(|c| normalize(c)).collect();

            let mut terms = HashSet::new();
            for term in &record.search_terms {
                let key = normalize(term);
                if key.is_empty() || !terms.insert(key.clone()) {
                    continue;
                }
                by_term.entry(key).or_default().push(position);
            }

            by_state
                .entry(record.state_abbr.clone())
                .or_default()
                .push(position);

            indexed.push(IndexedLocality {
                record,
                normalized_counties,
                terms,
            });
        }

        for (state, positions) in by_state.iter_mut() {
            let statewide = positions
                .iter()
                .filter(|&&p| indexed[p].record.is_statewide)
                .count();
            let rest_of_state = positions
                .iter()
                .filter(|&&p| indexed[p].record.is_rest_of_state)
                .count();
            if statewide > 1 || rest_of_state > 1 {
                return Err(LoadError::Invalid(format!(
                    "state {} has {} statewide and {} rest-of-state localities",
                    state, statewide, rest_of_state
                )));
            }

            // Stable sort: county-scoped, then rest-of-state, then statewide;
            // larger county lists first within each group.
            positions.sort_by_key(|&p| {
                let record = &indexed[p].record;
                (
                    record.is_statewide,
                    record.is_rest_of_state,
                    std::cmp::Reverse(record.counties.len()),
                )
            });
        }

        tracing::debug!(
            localities = indexed.len(),
            states = by_state.len(),
            terms = by_term.len(),
            zips = zip_to_county.len(),
            "compiled locality index"
        );

        Ok(Self {
            localities: indexed,
            by_state,
            by_term,
            zip_to_county,
            state_by_name,
        })
    }

    pub fn locality_count(&self) -> usize {
        self.localities.len()
    }

    pub fn zip_count(&self) -> usize {
        self.zip_to_county.len()
    }

    pub fn zip_county(&self, zip: &str) -> Option<&ZipCounty> {
        self.zip_to_county.get(zip)
    }

    /// Records for a state in specificity order
    pub fn state_localities(&self, abbr: &str) -> impl Iterator<Item = &LocalityRecord> {
        self.by_state
            .get(abbr)
            .into_iter()
            .flatten()
            .map(|&p| &self.localities[p].record)
    }

    /// Records declaring a normalized alias, in dataset order
    pub fn term_localities(&self, term: &str) -> impl Iterator<Item = &LocalityRecord> {
        self.by_term
            .get(term)
            .into_iter()
            .flatten()
            .map(|&p| &self.localities[p].record)
    }

    /// Detect a trailing state abbreviation or state name.
    ///
    /// The last comma-delimited segment is tried first, then the last
    /// whitespace-delimited token. Without a match the text comes back
    /// untouched.
    pub fn extract_state(&self, text: &str) -> StateQualifier {
        let segments: Vec<&str> = text.split(',').collect();
        if let Some((last, rest)) = segments.split_last()
            && !rest.is_empty()
            && let Some(abbr) = self.match_state(last.trim())
        {
            return StateQualifier {
                state_abbr: Some(abbr),
                remainder: rest.join(","),
            };
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        if let Some((last, rest)) = tokens.split_last()
            && let Some(abbr) = self.match_state(last)
        {
            return StateQualifier {
                state_abbr: Some(abbr),
                remainder: rest.join(" "),
            };
        }

        StateQualifier {
            state_abbr: None,
            remainder: text.to_string(),
        }
    }

    fn match_state(&self, candidate: &str) -> Option<String> {
        let upper = candidate.to_uppercase();
        if upper.chars().count() == STATE_ABBR_LENGTH && self.by_state.contains_key(&upper) {
            return Some(upper);
        }
        self.state_by_name.get(&normalize(candidate)).cloned()
    }

    /// Find the locality covering a county within a state.
    ///
    /// Tries the county lists, then aliases, then the statewide record, the
    /// rest-of-state record, and finally a state's only record.
    pub fn county_in_state(&self, state_abbr: &str, county: Option<&str>) -> Option<&LocalityRecord> {
        let positions = self.by_state.get(state_abbr)?;
        let candidates = || positions.iter().map(|&p| &self.localities[p]);

        if let Some(county) = county.map(normalize).filter(|c| !c.is_empty()) {
            if let Some(found) = candidates().find(|loc| loc.normalized_counties.contains(&county)) {
                return Some(&found.record);
            }
            if let Some(found) = candidates().find(|loc| loc.terms.contains(&county)) {
                return Some(&found.record);
            }
        }

        candidates()
            .find(|loc| loc.record.is_statewide)
            .or_else(|| candidates().find(|loc| loc.record.is_rest_of_state))
            .or_else(|| {
                if positions.len() == 1 {
                    candidates().next()
                } else {
                    None
                }
            })
            .map(|loc| &loc.record)
    }

    /// Look up a normalized alias and settle collisions.
    ///
    /// With a state qualifier, records from that state win; several of them
    /// go to the one listing the most counties. Collisions across states
    /// also go to the record listing the most counties, first one on ties.
    pub fn lookup_term(&self, term: &str, state_abbr: Option<&str>) -> Option<&LocalityRecord> {
        if term.is_empty() {
            return None;
        }
        let matches: Vec<&LocalityRecord> = self.term_localities(term).collect();
        if matches.is_empty() {
            return None;
        }

        if let Some(state) = state_abbr {
            let in_state: Vec<&LocalityRecord> = matches
                .iter()
                .copied()
                .filter(|loc| loc.state_abbr == state)
                .collect();
            if !in_state.is_empty() {
                return most_counties(&in_state);
            }
        }

        most_counties(&matches)
    }
}

/// First record with the longest county list
fn most_counties<'a>(records: &[&'a LocalityRecord]) -> Option<&'a LocalityRecord> {
    let mut best: Option<&'a LocalityRecord> = None;
    for &record in records {
        match best {
            Some(current) if current.counties.len() >= record.counties.len() => {}
            _ => best = Some(record),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locality(
        abbr: &str,
        number: &str,
        label: &str,
        counties: &[&str],
        terms: &[&str],
        statewide: bool,
        rest: bool,
    ) -> LocalityRecord {
        LocalityRecord {
            state: abbr.to_string(),
            state_abbr: abbr.to_string(),
            locality_number: number.to_string(),
            mac: "00000".to_string(),
            locality_label: label.to_string(),
            fee_schedule_area: label.to_string(),
            counties: counties.iter().map(|s| s.to_string()).collect(),
            search_terms: terms.iter().map(|s| s.to_string()).collect(),
            is_statewide: statewide,
            is_rest_of_state: rest,
        }
    }

    fn dataset(localities: Vec<LocalityRecord>) -> Dataset {
        Dataset {
            localities,
            zip_to_county: HashMap::new(),
            state_names: [("TX", "Texas"), ("NY", "New York"), ("OR", "Oregon")]
                .into_iter()
                .map(|(a, n)| (a.to_string(), n.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_state_bucket_is_specificity_sorted() {
        let index = CompiledIndex::build(dataset(vec![
            locality("TX", "99", "Rest of Texas", &[], &[], false, true),
            locality("TX", "09", "Brazoria", &["Brazoria"], &[], false, false),
            locality("TX", "18", "Dallas", &["Dallas", "Collin"], &[], false, false),
        ]))
        .unwrap();

        let order: Vec<&str> = index
            .state_localities("TX")
            .map(|r| r.locality_number.as_str())
            .collect();
        assert_eq!(order, vec!["18", "09", "99"]);
    }

    #[test]
    fn test_rejects_double_rest_of_state() {
        let result = CompiledIndex::build(dataset(vec![
            locality("TX", "99", "Rest of Texas", &[], &[], false, true),
            locality("TX", "98", "Other Texas", &[], &[], false, true),
        ]));
        assert!(matches!(result, Err(LoadError::Invalid(_))));
    }

    #[test]
    fn test_rejects_statewide_and_rest_on_one_record() {
        let result = CompiledIndex::build(dataset(vec![locality(
            "TX", "01", "Texas", &[], &[], true, true,
        )]));
        assert!(matches!(result, Err(LoadError::Invalid(_))));
    }

    #[test]
    fn test_extract_state_variants() {
        let index = CompiledIndex::build(dataset(vec![
            locality("TX", "18", "Dallas", &["Dallas"], &[], false, false),
            locality("NY", "01", "Manhattan", &["New York"], &[], false, false),
        ]))
        .unwrap();

        let q = index.extract_state("Dallas, tx");
        assert_eq!(q.state_abbr.as_deref(), Some("TX"));
        assert_eq!(q.remainder, "Dallas");

        let q = index.extract_state("Kings, New York");
        assert_eq!(q.state_abbr.as_deref(), Some("NY"));
        assert_eq!(q.remainder, "Kings");

        let q = index.extract_state("Dallas Texas");
        assert_eq!(q.state_abbr.as_deref(), Some("TX"));
        assert_eq!(q.remainder, "Dallas");

        // OR has a name but no localities, so the abbreviation is not a state here
        let q = index.extract_state("Portland OR");
        assert_eq!(q.state_abbr, None);
        assert_eq!(q.remainder, "Portland OR");

        let q = index.extract_state("Dallas, Narnia");
        assert_eq!(q.state_abbr, None);
        assert_eq!(q.remainder, "Dallas, Narnia");
    }

    #[test]
    fn test_county_in_state_fallbacks() {
        let index = CompiledIndex::build(dataset(vec![
            locality("TX", "18", "Dallas", &["Dallas"], &["BIG D"], false, false),
            locality("TX", "99", "Rest of Texas", &[], &[], false, true),
            locality("NY", "01", "Manhattan", &["New York"], &[], false, false),
            locality("NY", "02", "Queens", &["Queens"], &[], false, false),
        ]))
        .unwrap();

        let direct = index.county_in_state("TX", Some("dallas")).unwrap();
        assert_eq!(direct.locality_number, "18");
        let alias = index.county_in_state("TX", Some("Big-D")).unwrap();
        assert_eq!(alias.locality_number, "18");
        let rest = index.county_in_state("TX", Some("Travis")).unwrap();
        assert_eq!(rest.locality_number, "99");
        assert!(index.county_in_state("NY", Some("Erie")).is_none());
        assert!(index.county_in_state("CA", Some("Kern")).is_none());
    }

    #[test]
    fn test_lookup_term_disambiguation() {
        let index = CompiledIndex::build(dataset(vec![
            locality("TX", "18", "Springfield", &["A"], &["SPRINGFIELD"], false, false),
            locality("NY", "01", "Springfield", &["A", "B"], &["SPRINGFIELD"], false, false),
        ]))
        .unwrap();

        let tx = index.lookup_term("SPRINGFIELD", Some("TX")).unwrap();
        assert_eq!(tx.state_abbr, "TX");
        let ny = index.lookup_term("SPRINGFIELD", Some("NY")).unwrap();
        assert_eq!(ny.state_abbr, "NY");
        let unqualified = index.lookup_term("SPRINGFIELD", None).unwrap();
        assert_eq!(unqualified.state_abbr, "NY");
        assert!(index.lookup_term("", None).is_none());
    }
}
