//! HTTP REST surface.
//!
//! Authenticated REST API over the service layer: bearer-token sessions,
//! per-IP rate limiting, correlation ids, security headers, and permissive
//! CORS for browser callers. `/health` and `/api/auth/login` are public;
//! everything else under `/api` requires a valid session token when auth is
//! enabled.

pub mod error;
pub mod routes;

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::commands::CommandContext;
use crate::services::session_service::SessionContext;

use error::ApiError;

const CORRELATION_HEADER: &str = "x-correlation-id";

/// Requests allowed per IP per minute on `/api` routes.
const RATE_LIMIT_PER_MINUTE: u32 = 300;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<CommandContext>,
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(RATE_LIMIT_PER_MINUTE).expect("nonzero rate limit"),
        );
        Self {
            state: AppState {
                ctx,
                limiter: Arc::new(RateLimiter::keyed(quota)),
            },
        }
    }

    pub fn router(&self) -> Router {
        let public = Router::new()
            .route("/health", get(routes::health))
            .route("/api/auth/login", post(routes::login));

        let protected = Router::new()
            .route("/api/auth/logout", post(routes::logout))
            .route(
                "/api/auth/session",
                get(routes::get_session).put(routes::update_session),
            )
            .route(
                "/api/projects",
                get(routes::list_projects).post(routes::create_project),
            )
            .route(
                "/api/projects/{id}",
                get(routes::get_project)
                    .put(routes::update_project)
                    .delete(routes::delete_project),
            )
            .route("/api/projects/{id}/stats", get(routes::project_stats))
            .route(
                "/api/projects/{id}/tasks",
                get(routes::list_tasks).post(routes::create_task),
            )
            .route("/api/projects/{id}/next-task", post(routes::next_task))
            .route("/api/tasks/{id}/complete", post(routes::complete_task))
            .route("/api/tasks/{id}/fail", post(routes::fail_task))
            .route("/api/tasks/{id}/extend-lease", post(routes::extend_lease))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        public
            .merge(protected)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn(correlation_middleware))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until ctrl-c.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let config = &self.state.ctx.config;
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "http server listening");
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

/// Echo (or mint) a correlation id and attach security headers.
async fn correlation_middleware(request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response
}

/// Per-IP rate limit on `/api` routes.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path().starts_with("/api")
        && state.limiter.check_key(&addr.ip()).is_err()
    {
        return Err(ApiError::too_many_requests());
    }
    Ok(next.run(request).await)
}

/// Bearer-token authentication for protected routes.
///
/// When auth is disabled no session context is attached and handlers fall
/// back to explicit `projectId` request fields.
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.ctx.config.enable_auth {
        request.extensions_mut().insert(CurrentSession(None));
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?
        .to_string();

    let session = state
        .ctx
        .sessions
        .validate(&token)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::unauthorized("invalid or expired session token"))?;

    request
        .extensions_mut()
        .insert(CurrentSession(Some(Arc::new(session))));
    Ok(next.run(request).await)
}

/// Authenticated session attached by the auth middleware. `None` only when
/// auth is disabled in configuration.
#[derive(Clone)]
pub struct CurrentSession(pub Option<Arc<SessionContext>>);
