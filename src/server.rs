//! HTTP API over the locality resolver and the fee schedule client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::client::{FeeScheduleRequest, PfsClient};
use crate::compare::{self, ClaimAmounts, PriceComparison, parse_amount};
use crate::resolver::{LocalityResolver, ResolveError};
use crate::types::{LocalityMatch, ResolveFailure};
use crate::zipcode::describe_zip;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    resolver: LocalityResolver,
    pfs: PfsClient,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(resolver: LocalityResolver, pfs: PfsClient) -> Self {
        Self {
            resolver,
            pfs,
            metrics: Arc::new(Metrics {
                total_requests: AtomicU64::new(0),
                requests_in_flight: AtomicU64::new(0),
                unresolved: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }
}

/// Server metrics
struct Metrics {
    total_requests: AtomicU64,
    requests_in_flight: AtomicU64,
    unresolved: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    fn begin(&self) -> RequestGuard<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
        RequestGuard(&self.requests_in_flight)
    }
}

/// RAII guard for tracking in-flight requests
struct RequestGuard<'a>(&'a AtomicU64);

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the Axum application with routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/locality", post(resolve_locality))
        .route("/api/price", post(price_check))
        .route("/api/metrics", get(get_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
struct LocalityRequest {
    #[serde(default)]
    location: Option<String>,
}

/// Matched locality with display text
#[derive(Serialize)]
struct LocalityBody {
    ok: bool,
    #[serde(flatten)]
    locality: LocalityMatch,
    title: String,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    counties_included: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locality_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zip_place: Option<String>,
}

impl From<LocalityMatch> for LocalityBody {
    fn from(locality: LocalityMatch) -> Self {
        let zip_place = match &locality.via {
            crate::types::MatchVia::Zip { zip, .. } => Some(describe_zip(zip)),
            _ => None,
        };
        Self {
            ok: true,
            title: locality.title(),
            detail: locality.detail(),
            counties_included: locality.counties_included(),
            locality_code: locality.locality_code(),
            zip_place,
            locality,
        }
    }
}

async fn resolve_locality(
    State(state): State<AppState>,
    payload: Result<Json<LocalityRequest>, JsonRejection>,
) -> Result<Json<LocalityBody>, ApiError> {
    let _guard = state.metrics.begin();
    let Json(request) = payload?;
    let location = request.location.unwrap_or_default();
    let locality = resolve(&state, &location).await?;
    Ok(Json(locality.into()))
}

async fn resolve(state: &AppState, location: &str) -> Result<LocalityMatch, ApiError> {
    state.resolver.resolve(location).await.map_err(|e| {
        if let ResolveError::Unresolved(_) = e {
            state.metrics.unresolved.fetch_add(1, Ordering::Relaxed);
        }
        ApiError::from(e)
    })
}

#[derive(Deserialize)]
struct PriceRequest {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    hcpcs_code: Option<String>,
    #[serde(default)]
    current_bill: Option<String>,
    #[serde(default)]
    allowed_amount: Option<String>,
    #[serde(default)]
    year: Option<String>,
}

#[derive(Serialize)]
struct PriceResponse {
    locality: LocalityBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pricing: Option<PricingBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pricing_message: Option<String>,
}

#[derive(Serialize)]
struct PricingBody {
    year: String,
    code_title: String,
    description: String,
    locality_code: String,
    comparison: PriceComparison,
}

/// Resolve the location, then price the code against Medicare for it
async fn price_check(
    State(state): State<AppState>,
    payload: Result<Json<PriceRequest>, JsonRejection>,
) -> Result<Json<PriceResponse>, ApiError> {
    let _guard = state.metrics.begin();
    let Json(request) = payload?;
    let location = request.location.unwrap_or_default();
    let locality = resolve(&state, &location).await?;

    let hcpcs_code = request.hcpcs_code.as_deref().unwrap_or("").trim().to_string();
    let outcome = if hcpcs_code.is_empty() {
        Err("Enter an HCPCS code to see Medicare pricing.".to_string())
    } else {
        let amounts = ClaimAmounts {
            current_bill: request.current_bill.as_deref().and_then(parse_amount),
            allowed_amount: request.allowed_amount.as_deref().and_then(parse_amount),
        };
        price(&state, &locality, &hcpcs_code, request.year, amounts).await
    };

    let (pricing, pricing_message) = match outcome {
        Ok(pricing) => (Some(pricing), None),
        Err(message) => (None, Some(message)),
    };

    Ok(Json(PriceResponse {
        locality: locality.into(),
        pricing,
        pricing_message,
    }))
}

async fn price(
    state: &AppState,
    locality: &LocalityMatch,
    hcpcs_code: &str,
    year: Option<String>,
    amounts: ClaimAmounts,
) -> Result<PricingBody, String> {
    let request = FeeScheduleRequest {
        hcpcs_code: hcpcs_code.to_string(),
        mac: locality.locality.mac.clone(),
        locality_number: locality.locality.locality_number.clone(),
        year_key: year,
        include_all_macs: true,
    };
    let schedule = state.pfs.fetch_fee_schedule(&request).await.map_err(|e| {
        tracing::error!("Medicare pricing lookup failed: {:#}", e);
        "Unable to retrieve Medicare pricing right now. Please try again later.".to_string()
    })?;

    if schedule.rows.is_empty() {
        return Err("No Medicare pricing found for this code.".to_string());
    }

    let locality_code = locality.locality_code();
    let row = compare::select_row(
        &schedule.rows,
        schedule.matching_row.as_ref(),
        locality_code.as_deref(),
    )
    .ok_or_else(|| compare::NO_PRICING_MESSAGE.to_string())?;
    let comparison = compare::compare(row, locality, amounts).map_err(str::to_string)?;

    Ok(PricingBody {
        year: schedule.year.clone(),
        code_title: row.code_title(hcpcs_code),
        description: if row.description.trim().is_empty() {
            "CMS did not provide a short description for this code.".to_string()
        } else {
            row.description.trim().to_string()
        },
        locality_code: row.locality.clone(),
        comparison,
    })
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.metrics.total_requests.load(Ordering::Relaxed),
        requests_in_flight: state.metrics.requests_in_flight.load(Ordering::Relaxed),
        unresolved_locations: state.metrics.unresolved.load(Ordering::Relaxed),
        dataset_loaded: state.resolver.is_loaded().await,
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    total_requests: u64,
    requests_in_flight: u64,
    unresolved_locations: u64,
    dataset_loaded: bool,
    uptime_seconds: u64,
}

/// API error types
enum ApiError {
    BadRequest(String),
    Unresolved(ResolveFailure),
    Unavailable(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ResolveError> for ApiError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Unresolved(failure) => ApiError::Unresolved(failure),
            ResolveError::Load(e) => {
                tracing::error!("Locality dataset unavailable: {}", e);
                ApiError::Unavailable(
                    "Unexpected error looking up the CMS locality. Please try again.".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "ok": false,
                    "reason": "INVALID_REQUEST",
                    "message": message,
                })),
            )
                .into_response(),
            ApiError::Unresolved(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "ok": false,
                    "reason": failure.reason,
                    "message": failure.message,
                })),
            )
                .into_response(),
            ApiError::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "ok": false,
                    "error": message,
                })),
            )
                .into_response(),
        }
    }
}
