// Holdings ETL - Query Server
// Read-only JSON API over the holdings store for the dashboard

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use holdings_etl::{
    allocation_by_year, get_latest_merge_map, group_totals, logging, open_existing,
    query_holdings, GroupBy, HoldingsQuery,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "holdings-server", version, about = "Holdings dashboard query API")]
struct ServerArgs {
    #[arg(long, env = "HOLDINGS_DB")]
    db: PathBuf,

    #[arg(long, env = "HOLDINGS_ADDR", default_value = "0.0.0.0:3000")]
    addr: String,

    #[arg(long)]
    json_logs: bool,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
        .into_response()
}

/// Query string shared by the holdings endpoints
#[derive(Debug, Default, Deserialize)]
struct FilterParams {
    from: Option<i32>,
    to: Option<i32>,
    /// Comma-separated country list
    countries: Option<String>,
}

impl From<FilterParams> for HoldingsQuery {
    fn from(params: FilterParams) -> Self {
        let countries = params
            .countries
            .map(|list| {
                list.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        HoldingsQuery {
            year_from: params.from,
            year_to: params.to,
            countries,
        }
    }
}

/// Run a store query under the connection lock and wrap the result
fn with_conn<T, F>(state: &AppState, what: &str, f: F) -> Response
where
    T: Serialize,
    F: FnOnce(&Connection) -> anyhow::Result<T>,
{
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"),
    };

    match f(&conn) {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            error!("Error getting {}: {:#}", what, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to load {}", what))
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/holdings?from&to&countries
async fn get_holdings(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Response {
    let query = HoldingsQuery::from(params);
    with_conn(&state, "holdings", |conn| query_holdings(conn, &query))
}

/// GET /api/allocation?from&to&countries - Equity vs fixed income per year
async fn get_allocation(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Response {
    let query = HoldingsQuery::from(params);
    with_conn(&state, "allocation", |conn| allocation_by_year(conn, &query))
}

/// GET /api/totals/:group_by - e.g. /api/totals/year,sector
async fn get_totals(
    State(state): State<AppState>,
    Path(group_by): Path<String>,
    Query(params): Query<FilterParams>,
) -> Response {
    let mut dimensions = Vec::new();
    for label in group_by.split(',') {
        match GroupBy::parse(label) {
            Some(dimension) => dimensions.push(dimension),
            None => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("unknown grouping dimension '{}'", label),
                )
            }
        }
    }

    let query = HoldingsQuery::from(params);
    with_conn(&state, "totals", |conn| group_totals(conn, &dimensions, &query))
}

/// GET /api/countries/:country/holdings
async fn get_country_holdings(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Response {
    // Decode URL-encoded country names ("United%20Kingdom")
    let decoded = urlencoding::decode(&country)
        .map(|c| c.into_owned())
        .unwrap_or(country);

    let query = HoldingsQuery {
        countries: vec![decoded],
        ..HoldingsQuery::default()
    };
    with_conn(&state, "country holdings", |conn| query_holdings(conn, &query))
}

/// GET /api/merges - Name merge map of the latest run
async fn get_merges(State(state): State<AppState>) -> Response {
    with_conn(&state, "merges", |conn| {
        Ok(get_latest_merge_map(conn)?.entries().to_vec())
    })
}

// ============================================================================
// Main Server
// ============================================================================

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/holdings", get(get_holdings))
        .route("/allocation", get(get_allocation))
        .route("/totals/:group_by", get(get_totals))
        .route("/countries/:country/holdings", get(get_country_holdings))
        .route("/merges", get(get_merges))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    logging::init(args.json_logs);

    let conn = open_existing(&args.db)?;
    info!(db = ?args.db, "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, "query server listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
