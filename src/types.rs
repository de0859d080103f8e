use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One CMS payment locality as published in the locality mapping dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityRecord {
    pub state: String,
    pub state_abbr: String,
    #[serde(deserialize_with = "string_or_number")]
    pub locality_number: String,
    pub mac: String,
    pub locality_label: String,
    #[serde(default)]
    pub fee_schedule_area: String,
    #[serde(default)]
    pub counties: Vec<String>,
    /// Free-text aliases; only used for matching, never shown to users
    #[serde(default, skip_serializing)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub is_statewide: bool,
    #[serde(default)]
    pub is_rest_of_state: bool,
}

/// County a ZIP code falls in (largest population share wins upstream)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipCounty {
    pub county: String,
    pub state_abbr: String,
}

/// The static locality mapping document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub localities: Vec<LocalityRecord>,
    #[serde(default)]
    pub zip_to_county: HashMap<String, ZipCounty>,
    /// State abbreviation -> full state name
    #[serde(default)]
    pub state_names: HashMap<String, String>,
}

/// Accepts `"01"` as well as `1` for locality numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Which strategy of the resolution cascade produced a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "kebab-case")]
pub enum MatchVia {
    Zip {
        zip: String,
        county: String,
    },
    Term {
        #[serde(rename = "matchedTerm")]
        matched_term: String,
    },
    State,
    StateFallback,
}

impl MatchVia {
    /// Stable tag: `zip`, `term`, `state` or `state-fallback`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Zip { .. } => "zip",
            Self::Term { .. } => "term",
            Self::State => "state",
            Self::StateFallback => "state-fallback",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Zip { .. } => "Matched the ZIP code to the CMS locality for that county.",
            Self::Term { .. } => "Matched the location text you entered to a CMS locality.",
            Self::State => "Matched based on the statewide locality for that state.",
            Self::StateFallback => {
                "Selected the closest locality available for the state provided."
            }
        }
    }
}

/// Successful resolution: the locality's public fields plus how it was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalityMatch {
    #[serde(flatten)]
    pub locality: LocalityRecord,
    #[serde(flatten)]
    pub via: MatchVia,
}

impl LocalityMatch {
    /// Heading shown to the user, e.g. "Los Angeles, CA"
    pub fn title(&self) -> String {
        format!(
            "{}, {}",
            self.locality.locality_label, self.locality.state_abbr
        )
    }

    /// Strategy message with the most useful qualifier appended
    pub fn detail(&self) -> String {
        let message = self.via.message();
        if let MatchVia::Zip { county, .. } = &self.via {
            format!("{} County resolved: {}.", message, county)
        } else if self.locality.is_rest_of_state {
            format!(
                "{} Covers the remaining counties in {}.",
                message, self.locality.state
            )
        } else if self.locality.is_statewide {
            format!("{} Applies statewide.", message)
        } else {
            message.to_string()
        }
    }

    /// Counties to list for this locality, or a stand-in for catch-all records
    pub fn counties_included(&self) -> Option<String> {
        let label = self.locality.locality_label.to_uppercase();
        let mut seen: Vec<&str> = Vec::new();
        for county in &self.locality.counties {
            if county.is_empty() || county.to_uppercase() == label {
                continue;
            }
            if !seen.contains(&county.as_str()) {
                seen.push(county);
            }
        }

        if !seen.is_empty() {
            Some(seen.join(", "))
        } else if self.locality.is_statewide {
            Some("All counties".to_string())
        } else if self.locality.is_rest_of_state {
            Some("Rest of state".to_string())
        } else {
            None
        }
    }

    /// Full fee schedule locality code (MAC + two-digit locality)
    pub fn locality_code(&self) -> Option<String> {
        crate::pfs::format_locality_code(&self.locality.mac, &self.locality.locality_number)
    }
}

/// Stable reason codes for inputs that could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    EmptyInput,
    UnknownZip,
    NoLocalityForZip,
    NoMatch,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "EMPTY_INPUT",
            Self::UnknownZip => "UNKNOWN_ZIP",
            Self::NoLocalityForZip => "NO_LOCALITY_FOR_ZIP",
            Self::NoMatch => "NO_MATCH",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An expected, user-correctable resolution outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl ResolveFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for ResolveFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str) -> LocalityRecord {
        LocalityRecord {
            state: "Illinois".to_string(),
            state_abbr: "IL".to_string(),
            locality_number: "16".to_string(),
            mac: "06102".to_string(),
            locality_label: label.to_string(),
            fee_schedule_area: "Chicago".to_string(),
            counties: vec!["Cook".to_string(), "Cook".to_string(), "Chicago".to_string()],
            search_terms: vec!["COOK".to_string()],
            is_statewide: false,
            is_rest_of_state: false,
        }
    }

    #[test]
    fn test_locality_number_accepts_integers() {
        let json = r#"{
            "state": "Alaska", "stateAbbr": "AK", "localityNumber": 1,
            "mac": "02102", "localityLabel": "Alaska", "isStatewide": true,
            "rawCounties": "STATEWIDE"
        }"#;
        let record: LocalityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.locality_number, "1");
        assert!(record.counties.is_empty());
        assert!(record.is_statewide);
    }

    #[test]
    fn test_match_serializes_flat_with_via_tag() {
        let matched = LocalityMatch {
            locality: record("Chicago"),
            via: MatchVia::Term {
                matched_term: "COOK IL".to_string(),
            },
        };
        let value = serde_json::to_value(&matched).unwrap();
        assert_eq!(value["via"], "term");
        assert_eq!(value["matchedTerm"], "COOK IL");
        assert_eq!(value["stateAbbr"], "IL");
        assert!(value.get("searchTerms").is_none());
    }

    #[test]
    fn test_counties_included_skips_label_and_duplicates() {
        let matched = LocalityMatch {
            locality: record("Chicago"),
            via: MatchVia::State,
        };
        assert_eq!(matched.counties_included().as_deref(), Some("Cook"));
        assert_eq!(matched.title(), "Chicago, IL");
        assert_eq!(matched.locality_code().as_deref(), Some("0610216"));
    }

    #[test]
    fn test_detail_mentions_zip_county() {
        let matched = LocalityMatch {
            locality: record("Chicago"),
            via: MatchVia::Zip {
                zip: "60601".to_string(),
                county: "Cook".to_string(),
            },
        };
        assert!(matched.detail().ends_with("County resolved: Cook."));
        assert_eq!(FailureReason::NoLocalityForZip.to_string(), "NO_LOCALITY_FOR_ZIP");
    }
}
