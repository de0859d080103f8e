use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use wreq::{Client, header};

use crate::cache::SingleFlight;
use crate::pfs::{
    Catalog, DEFAULT_QUERY_LIMIT, PricingQuery, PricingRow, build_pricing_query,
    format_locality_code, rows_to_csv,
};

const CATALOG_PATH: &str = "/metastore/schemas/dataset/items?show-reference-ids";
const QUERY_PATH: &str = "/datastore/query";

/// What to price and where
#[derive(Debug, Clone, Default)]
pub struct FeeScheduleRequest {
    pub hcpcs_code: String,
    pub mac: String,
    pub locality_number: String,
    /// Release to query; latest available when absent
    pub year_key: Option<String>,
    /// Return rows for every locality rather than only the requested one
    pub include_all_macs: bool,
}

/// Fee schedule rows for one code
#[derive(Debug, Clone, Serialize)]
pub struct FeeSchedule {
    pub year: String,
    pub rows: Vec<PricingRow>,
    pub csv: String,
    /// Row for the requested MAC/locality, if present
    pub matching_row: Option<PricingRow>,
    #[serde(skip)]
    pub query: Value,
}

/// Client for the CMS Physician Fee Schedule data API.
///
/// Clones share the HTTP connection pool and the catalog cache.
#[derive(Clone)]
pub struct PfsClient {
    http_client: Client,
    api_base: String,
    catalog: SingleFlight<Catalog, anyhow::Error>,
}

impl PfsClient {
    pub fn with_base(api_base: &str) -> Result<Self> {
        let http_client = Client::builder()
            .gzip(true)
            .brotli(true)
            .zstd(true)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http_client, api_base))
    }

    pub fn with_client(http_client: Client, api_base: &str) -> Self {
        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            catalog: SingleFlight::new(),
        }
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Fee schedule releases, fetched once and shared by all callers.
    ///
    /// A failed fetch is not cached.
    pub async fn catalog(&self) -> Result<std::sync::Arc<Catalog>> {
        let http_client = self.http_client.clone();
        let url = format!("{}{}", self.api_base, CATALOG_PATH);
        self.catalog
            .get_or_load(|| async move {
                tracing::info!(%url, "fetching fee schedule catalog");
                let response = http_client
                    .get(&url)
                    .header(header::ACCEPT, "application/json")
                    .send()
                    .await
                    .context("Failed to reach fee schedule catalog")?;

                let status = response.status();
                if !status.is_success() {
                    bail!("Failed to load PFS catalog ({})", status.as_u16());
                }

                let payload: Value = response
                    .json()
                    .await
                    .context("Failed to parse fee schedule catalog")?;
                let catalog = Catalog::from_items(payload)?;
                tracing::debug!(years = catalog.years.len(), "fee schedule catalog ready");
                Ok(catalog)
            })
            .await
            .map_err(|e| anyhow!("{:#}", e))
    }

    async fn post_query(&self, search_label: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.api_base, QUERY_PATH);
        let response = self
            .http_client
            .post(&url)
            .query(&[("search", search_label), ("redirect", "false")])
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to reach fee schedule datastore")?;

        let status = response.status();
        if !status.is_success() {
            bail!("PFS query failed ({})", status.as_u16());
        }

        response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse PFS query response: {}", e))
    }

    /// Price one HCPCS code, optionally pinned to a release year.
    pub async fn fetch_fee_schedule(&self, request: &FeeScheduleRequest) -> Result<FeeSchedule> {
        if request.hcpcs_code.trim().is_empty() {
            bail!("HCPCS code is required.");
        }

        let catalog = self.catalog().await?;
        let year = match request.year_key.as_deref() {
            Some(year) => year.to_string(),
            None => catalog
                .latest_year_key()
                .ok_or_else(|| {
                    anyhow!("Unable to determine an available Physician Fee Schedule year.")
                })?
                .to_string(),
        };
        let release = catalog
            .years
            .get(&year)
            .ok_or_else(|| anyhow!("Physician Fee Schedule year {} is not available.", year))?;
        let (Some(indicator_id), Some(locality_id)) = (&release.indicator, &release.locality)
        else {
            bail!("Physician Fee Schedule year {} is incomplete.", year);
        };

        let locality_code = format_locality_code(&request.mac, &request.locality_number);
        let (query, code) = build_pricing_query(&PricingQuery {
            year_key: &year,
            indicator_id,
            locality_id,
            hcpcs_code: &request.hcpcs_code,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
            include_all_macs: request.include_all_macs,
            mac_code: Some(request.mac.as_str()).filter(|m| !m.trim().is_empty()),
            locality_code: locality_code.as_deref(),
        })?;

        let search_label = format!("pricing_single_{}", code);
        tracing::debug!(%code, %year, locality = ?locality_code, "querying fee schedule");
        let response = self.post_query(&search_label, &query).await?;

        let rows: Vec<PricingRow> = response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(Value::as_object)
                    .map(PricingRow::from_result)
                    .collect()
            })
            .unwrap_or_default();
        let csv = rows_to_csv(&rows)?;
        let matching_row = locality_code
            .as_deref()
            .and_then(|code| rows.iter().find(|row| row.locality == code))
            .cloned();

        Ok(FeeSchedule {
            year,
            rows,
            csv,
            matching_row,
            query,
        })
    }
}
