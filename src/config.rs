use std::env;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATASET: &str = "assets/data/locality-mapping.json";
pub const DEFAULT_PFS_API_BASE: &str = "https://pfs.data.cms.gov/api/1";

/// Runtime configuration read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server listen port (`PORT`)
    pub port: u16,
    /// Locality mapping path or URL (`LOCALITY_DATA`)
    pub dataset: String,
    /// Physician Fee Schedule API base (`PFS_API_BASE`)
    pub pfs_api_base: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            port: non_empty("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            dataset: non_empty("LOCALITY_DATA").unwrap_or_else(|| DEFAULT_DATASET.to_string()),
            pfs_api_base: non_empty("PFS_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PFS_API_BASE.to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
