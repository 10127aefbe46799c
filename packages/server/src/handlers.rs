//! HTTP handler functions for the SafeRoute API.

use actix_web::error::{BlockingError, JsonPayloadError, QueryPayloadError};
use actix_web::http::StatusCode;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use saferoute_hazard::HazardError;
use saferoute_hazard::export::{ExportRow, to_csv_string};
use saferoute_hazard::feed::{parse_csv_feed, parse_json_feed, parse_timestamp};
use saferoute_hazard::query::{self, ListingQuery, NearbyQuery, RecentQuery};
use saferoute_hazard_models::{GeoPoint, IncidentCategory, Severity};
use saferoute_risk::HotspotQuery;
use saferoute_routing::{CancelToken, ErrorCode, RouteOptions, RoutingError};
use saferoute_server_models::{
    ApiError, ApiHealth, AreaParams, ExportFormat, FindPathRequest, IngestResponse,
    ListingParams, ListingResponse, NearbyParams, NearbyResponse, RecentParams, RecentResponse,
    RouteSafetyRequest, RouteSafetyResponse,
};

use crate::AppState;

/// Largest accepted search radius for area queries.
pub const MAX_RADIUS_M: f64 = 10_000.0;
/// Longest window of the recent endpoint.
pub const MAX_RECENT_HOURS: i64 = 168;
/// Window used when `live=true`.
pub const LIVE_HOURS: i64 = 6;
pub const MAX_RECENT_LIMIT: usize = 5_000;
pub const MAX_EXPORT_LIMIT: usize = 50_000;
/// Longest look-back of the hotspot and statistics endpoints.
pub const MAX_DAYS: u32 = 365;

const DEFAULT_NEARBY_LIMIT: usize = 100;
const DEFAULT_BUFFER_M: f64 = 500.0;

/// Errors returned by handlers, rendered as `{error, code}`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Logged, never shown to the client.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Routing(RoutingError::validation(message))
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Routing(e) => e.code(),
            Self::RateLimited => ErrorCode::RateLimited,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<HazardError> for ServerError {
    fn from(e: HazardError) -> Self {
        Self::Routing(e.into())
    }
}

impl From<BlockingError> for ServerError {
    fn from(e: BlockingError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            Self::Routing(e) => e.message().to_string(),
            Self::RateLimited => self.to_string(),
            Self::Internal(detail) => {
                log::error!("{detail}");
                "Internal server error".to_string()
            }
        };
        HttpResponse::build(self.status_code()).json(ApiError {
            error,
            code: self.code(),
        })
    }
}

type ApiResult = Result<HttpResponse, ServerError>;

/// Renders malformed query strings as validation errors.
pub fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ServerError::validation(format!("Invalid query string: {err}")).into()
}

/// Renders malformed JSON bodies as validation errors.
pub fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ServerError::validation(format!("Invalid JSON payload: {err}")).into()
}

fn rate_limit(state: &AppState, req: &HttpRequest) -> Result<(), ServerError> {
    let info = req.connection_info();
    let client = info.realip_remote_addr().unwrap_or("unknown");
    if state.limiter.check(client) {
        Ok(())
    } else {
        Err(ServerError::RateLimited)
    }
}

/// Cancels the search when the request future is dropped, e.g. because the
/// client went away.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn position(lat: Option<f64>, lng: Option<f64>) -> Result<GeoPoint, ServerError> {
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(ServerError::validation(
            "Missing required parameters: lat and lng",
        ));
    };
    let point = GeoPoint::new(lat, lng);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(ServerError::validation("Invalid coordinates"))
    }
}

fn check_radius(value: Option<f64>, default: f64) -> Result<f64, ServerError> {
    let radius = value.unwrap_or(default);
    if radius.is_finite() && radius > 0.0 && radius <= MAX_RADIUS_M {
        Ok(radius)
    } else {
        Err(ServerError::validation(format!(
            "radius must be in (0, {MAX_RADIUS_M}] meters"
        )))
    }
}

fn check_days(value: Option<u32>, default: u32) -> Result<u32, ServerError> {
    let days = value.unwrap_or(default);
    if (1..=MAX_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ServerError::validation(format!(
            "days must be between 1 and {MAX_DAYS}"
        )))
    }
}

fn parse_severity(value: Option<&str>) -> Result<Option<Severity>, ServerError> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse::<Severity>().map_err(|_| {
                ServerError::validation(format!("Unknown severity '{s}' (high, medium, low)"))
            })
        })
        .transpose()
}

fn parse_format(value: Option<&str>) -> Result<ExportFormat, ServerError> {
    value.map_or(Ok(ExportFormat::Json), |s| {
        s.parse()
            .map_err(|_| ServerError::validation(format!("Unknown format '{s}' (json, csv)")))
    })
}

/// Accepts `YYYY-MM-DD` or any feed timestamp. A bare end date covers the
/// whole day.
fn date_bound(value: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, ServerError> {
    let Some(s) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_milli_opt(23, 59, 59, 999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return Ok(time.map(|t| t.and_utc()));
    }
    parse_timestamp(s)
        .map(Some)
        .ok_or_else(|| ServerError::validation(format!("Unparseable date '{s}'")))
}

fn csv_response(rows: &[ExportRow], filename: &str) -> ApiResult {
    let body = to_csv_string(rows).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={filename}"),
        ))
        .body(body))
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let network = state.routing.network();
    let hazards = state.routing.hazards();
    let snapshot = hazards.snapshot();
    let feed = hazards.feed_status();

    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        nodes: network.node_count(),
        edges: network.edge_count(),
        incidents: snapshot.len(),
        snapshot_version: snapshot.version(),
        risk_available: feed.available,
        last_feed_success: feed.last_success,
        last_feed_error: feed.last_error,
    })
}

/// `GET /api/algorithm/find-path`
pub async fn find_path_get(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<FindPathRequest>,
) -> ApiResult {
    find_path(state, req, params.into_inner()).await
}

/// `POST /api/algorithm/find-path`
///
/// Parameters come from the JSON body, or from the query string when the
/// body is empty.
pub async fn find_path_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ApiResult {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        web::Query::<FindPathRequest>::from_query(req.query_string())
            .map_err(|e| ServerError::validation(format!("Invalid query string: {e}")))?
            .into_inner()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::validation(format!("Invalid JSON payload: {e}")))?
    };
    find_path(state, req, request).await
}

/// Runs the Pareto search on the blocking pool.
async fn find_path(
    state: web::Data<AppState>,
    req: HttpRequest,
    request: FindPathRequest,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let (Some(start_lat), Some(start_lon), Some(end_lat), Some(end_lon)) = (
        request.start_lat,
        request.start_lon,
        request.end_lat,
        request.end_lon,
    ) else {
        return Err(ServerError::validation(
            "Missing required parameters: start_lat, start_lon, end_lat, end_lon",
        ));
    };
    let origin = GeoPoint::new(start_lat, start_lon);
    let destination = GeoPoint::new(end_lat, end_lon);

    let guard = CancelOnDrop(CancelToken::new());
    let options = RouteOptions {
        max_paths: request.max_paths,
        sort: request.sort.unwrap_or_default(),
        max_edge_risk: request.max_edge_risk,
        as_of: request.as_of,
        cancel: Some(guard.0.clone()),
    };

    let service = state.routing.clone();
    let routes = web::block(move || service.find_path(origin, destination, &options)).await??;
    drop(guard);

    Ok(HttpResponse::Ok().json(routes))
}

/// `GET /api/crime/nearby`
pub async fn nearby(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<NearbyParams>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let center = position(params.lat, params.lng)?;
    let radius_m = check_radius(params.radius, 1_000.0)?;
    let window_minutes = params
        .minutes
        .unwrap_or_else(|| params.hours.unwrap_or(24).saturating_mul(60));
    if !(1..=MAX_RECENT_HOURS * 60).contains(&window_minutes) {
        return Err(ServerError::validation(format!(
            "time window must be between 1 minute and {MAX_RECENT_HOURS} hours"
        )));
    }
    let severity = parse_severity(params.severity.as_deref())?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NEARBY_LIMIT)
        .min(MAX_RECENT_LIMIT);

    let snapshot = state.routing.hazards().snapshot();
    let result = query::nearby(
        &snapshot,
        &NearbyQuery {
            center,
            radius_m,
            window: Duration::minutes(window_minutes),
            severity,
            limit,
        },
        Utc::now(),
    );

    Ok(HttpResponse::Ok().json(NearbyResponse::new(center, radius_m, window_minutes, &result)))
}

/// `GET /api/crimes/recent`
pub async fn recent(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<RecentParams>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let live_mode = params.live.unwrap_or(false);
    let hours = if live_mode {
        LIVE_HOURS
    } else {
        params.hours.unwrap_or(24).clamp(1, MAX_RECENT_HOURS)
    };
    let limit = params.limit.unwrap_or(1_000).min(MAX_RECENT_LIMIT);
    let severity = parse_severity(params.severity.as_deref())?;
    let format = parse_format(params.format.as_deref())?;

    let now = Utc::now();
    let snapshot = state.routing.hazards().snapshot();
    let result = query::recent(
        &snapshot,
        &RecentQuery {
            window: Duration::hours(hours),
            limit,
            severity,
            region: None,
        },
        now,
    );

    match format {
        ExportFormat::Csv => {
            let rows: Vec<ExportRow> = result.incidents.iter().map(ExportRow::from).collect();
            csv_response(&rows, &format!("recent_incidents_{hours}h.csv"))
        }
        ExportFormat::Json => {
            Ok(HttpResponse::Ok().json(RecentResponse::new(hours, live_mode, &result)))
        }
    }
}

/// `GET /api/crimes/all`
pub async fn all(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<ListingParams>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let params = params.into_inner();
    let limit = params.limit.unwrap_or(10_000).min(MAX_EXPORT_LIMIT);
    let format = parse_format(params.format.as_deref())?;
    let start = date_bound(params.start_date.as_deref(), false)?;
    let end = date_bound(params.end_date.as_deref(), true)?;
    let category = params
        .category
        .as_deref()
        .map(|c| {
            c.parse::<IncidentCategory>()
                .map_err(|_| ServerError::validation(format!("Unknown category '{c}'")))
        })
        .transpose()?;

    let listing_query = ListingQuery {
        limit,
        start,
        end,
        crime_type: params.crime_type,
        category,
        district: params.district,
    };
    let snapshot = state.routing.hazards().snapshot();
    let result = web::block(move || query::listing(&snapshot, &listing_query)).await?;

    match format {
        ExportFormat::Csv => {
            let rows: Vec<ExportRow> = result.incidents.iter().map(ExportRow::from).collect();
            let filename = format!(
                "incidents_{}_to_{}.csv",
                params.start_date.as_deref().unwrap_or("start"),
                params.end_date.as_deref().unwrap_or("now")
            );
            csv_response(&rows, &filename)
        }
        ExportFormat::Json => Ok(HttpResponse::Ok().json(ListingResponse {
            total: result.incidents.len(),
            limit,
            result,
        })),
    }
}

/// `POST /api/crime/route-safety`
pub async fn route_safety(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<RouteSafetyRequest>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let body = body.into_inner();
    let waypoints: Vec<GeoPoint> = body.waypoints.into_iter().map(GeoPoint::from).collect();
    let analysis = state.routing.analyze_route(
        &waypoints,
        body.buffer_meters.unwrap_or(DEFAULT_BUFFER_M),
        body.time_window_hours.unwrap_or(24),
        Utc::now(),
    )?;
    Ok(HttpResponse::Ok().json(RouteSafetyResponse {
        route_analysis: analysis,
    }))
}

/// `GET /api/crime/hotspots`
pub async fn hotspots(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<AreaParams>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let center = position(params.lat, params.lng)?;
    let radius_m = check_radius(params.radius, 2_000.0)?;
    let days = check_days(params.days, 7)?;
    let window = Duration::days(i64::from(days));

    let now = Utc::now();
    let field = state.routing.risk_field(now);
    field.snapshot().ensure_retained(now - window)?;
    let report = field.hotspots(&HotspotQuery {
        center,
        radius_m,
        window,
        cell_size_m: state.routing.risk_config().cell_size_m,
    });
    Ok(HttpResponse::Ok().json(report))
}

/// `GET /api/crime/stats`
pub async fn stats(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<AreaParams>,
) -> ApiResult {
    rate_limit(&state, &req)?;

    let center = position(params.lat, params.lng)?;
    let radius_m = check_radius(params.radius, 1_000.0)?;
    let days = check_days(params.days, 30)?;

    let now = Utc::now();
    let snapshot = state.routing.hazards().snapshot();
    snapshot.ensure_retained(now - Duration::days(i64::from(days)))?;
    let stats = query::statistics(&snapshot, center, radius_m, days, now);
    Ok(HttpResponse::Ok().json(stats))
}

/// `POST /api/incidents`
///
/// Accepts a JSON feed document, or CSV when sent as `text/csv`. A
/// document that cannot be parsed marks the feed unavailable, which
/// switches routing to time-only until the next good batch.
pub async fn ingest(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> ApiResult {
    let is_csv = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/csv"));

    let parsed = if is_csv {
        parse_csv_feed(body.as_ref(), Some("push"))
    } else {
        parse_json_feed(&body, Some("push"))
    };
    let hazards = state.routing.hazards();
    let batch = match parsed {
        Ok(batch) => batch,
        Err(e) => {
            hazards.mark_feed_failure(e.to_string());
            return Err(e.into());
        }
    };

    let now = Utc::now();
    let report = hazards.ingest_batch(batch.incidents, now);
    hazards.mark_feed_success(now);

    Ok(HttpResponse::Ok().json(IngestResponse {
        report,
        skipped: batch.skipped,
    }))
}
