//! The locality resolution cascade.

use crate::index::CompiledIndex;
use crate::normalize::{LocationInput, classify, normalize};
use crate::types::{FailureReason, LocalityMatch, LocalityRecord, MatchVia, ResolveFailure};

pub type LocalityResult = Result<LocalityMatch, ResolveFailure>;

impl CompiledIndex {
    /// Map free-form input (ZIP, "county, state", or a state) to one locality.
    ///
    /// Strategies run in a fixed order and the first hit wins; the same
    /// input against the same index always yields the same answer.
    pub fn resolve(&self, raw_input: &str) -> LocalityResult {
        let input = raw_input.trim();
        if input.is_empty() {
            return Err(ResolveFailure::new(
                FailureReason::EmptyInput,
                "No location provided.",
            ));
        }

        match classify(input) {
            LocationInput::Zip(zip) => self.resolve_zip(zip),
            LocationInput::Text(text) => self.resolve_text(text),
        }
    }

    fn resolve_zip(&self, zip: &str) -> LocalityResult {
        let Some(entry) = self.zip_county(zip) else {
            return Err(ResolveFailure::new(
                FailureReason::UnknownZip,
                format!("ZIP code {} is not mapped to a CMS locality.", zip),
            ));
        };

        match self.county_in_state(&entry.state_abbr, Some(&entry.county)) {
            Some(locality) => Ok(matched(
                locality,
                MatchVia::Zip {
                    zip: zip.to_string(),
                    county: entry.county.clone(),
                },
            )),
            None => Err(ResolveFailure::new(
                FailureReason::NoLocalityForZip,
                format!(
                    "No CMS locality found for {}, {}.",
                    entry.county, entry.state_abbr
                ),
            )),
        }
    }

    fn resolve_text(&self, input: &str) -> LocalityResult {
        let qualifier = self.extract_state(input);
        let state = qualifier.state_abbr.as_deref();
        let location = normalize(&qualifier.remainder);

        if location.is_empty()
            && let Some(state) = state
            && let Some(locality) = self.county_in_state(state, None)
        {
            return Ok(matched(locality, MatchVia::State));
        }

        for alias in alias_candidates(&location, state) {
            if let Some(locality) = self.lookup_term(&alias, state) {
                return Ok(matched(
                    locality,
                    MatchVia::Term {
                        matched_term: alias,
                    },
                ));
            }
        }

        if let Some(state) = state
            && let Some(locality) = self.county_in_state(state, Some(&location))
        {
            return Ok(matched(locality, MatchVia::StateFallback));
        }

        Err(ResolveFailure::new(
            FailureReason::NoMatch,
            format!(
                "Could not map \"{}\" to a CMS locality. Provide a ZIP code or include the state/county name.",
                input
            ),
        ))
    }
}

/// Alias spellings to probe, in priority order
fn alias_candidates(location: &str, state: Option<&str>) -> Vec<String> {
    let mut aliases = vec![location.to_string()];
    if let Some(state) = state {
        aliases.push(format!("{} {}", location, state).trim().to_string());
        aliases.push(format!("{} COUNTY", location).trim().to_string());
        aliases.push(format!("{} COUNTY {}", location, state).trim().to_string());
    }
    aliases
}

fn matched(locality: &LocalityRecord, via: MatchVia) -> LocalityMatch {
    LocalityMatch {
        locality: locality.clone(),
        via,
    }
}
