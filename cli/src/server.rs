use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Extension, Form, Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Local;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use portion_core::error::TrackerError;
use portion_core::models::{
    Dashboard, FoodEntry, FoodForm, GOAL_CHOICES, GoalType, MEAL_LIST_UPDATED, ProgressReport,
    User,
};
use portion_core::onboarding::{OnboardingForm, OnboardingState, Step};
use portion_core::service::{OnboardingOutcome, TrackerService};
use portion_core::session::SessionData;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const SESSION_COOKIE: &str = "portion_session";
const SESSION_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;
const HX_TRIGGER: &str = "hx-trigger";

type SessionLocks = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<TrackerService>>,
    session_locks: Arc<Mutex<SessionLocks>>,
}

impl AppState {
    fn new(service: TrackerService) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn service(&self) -> MutexGuard<'_, TrackerService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_lease(&self, token: &str) -> SessionLease {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(token.to_string()).or_default());
        SessionLease {
            locks: Arc::clone(&self.session_locks),
            token: token.to_string(),
            lock,
        }
    }
}

/// A claim on the per-token request lock. The map entry goes away with the
/// last lease, whether its request finished or was cancelled while waiting.
struct SessionLease {
    locks: Arc<Mutex<SessionLocks>>,
    token: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionLease {
    fn mutex(&self) -> &tokio::sync::Mutex<()> {
        &self.lock
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference is ours, the other belongs to the map.
        let last = locks
            .get(&self.token)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if last {
            locks.remove(&self.token);
        }
    }
}

// --- Session plumbing ---

#[derive(Default)]
struct SessionSlot {
    data: SessionData,
    ended: bool,
    cycled: bool,
}

/// The current request's session, shared between the session layer and handlers.
#[derive(Clone)]
struct SessionHandle(Arc<Mutex<SessionSlot>>);

impl SessionHandle {
    fn new(data: SessionData) -> Self {
        Self(Arc::new(Mutex::new(SessionSlot {
            data,
            ..SessionSlot::default()
        })))
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn data(&self) -> SessionData {
        self.slot().data.clone()
    }

    /// Issue a new token for this session once the request is done.
    fn cycle_id(&self) {
        self.slot().cycled = true;
    }

    fn end(&self) {
        let mut slot = self.slot();
        slot.data = SessionData::default();
        slot.ended = true;
    }
}

#[derive(Clone)]
struct CurrentUser(User);

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == SESSION_COOKIE && !c.value().is_empty())
        .map(|c| c.value().to_string())
}

fn build_session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::seconds(SESSION_MAX_AGE_SECS))
        .build()
}

fn append_cookie(response: &mut Response, cookie: &Cookie<'_>) -> anyhow::Result<()> {
    let value = HeaderValue::from_str(&cookie.to_string()).context("invalid session cookie")?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(())
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginPage {
    fields: [&'static str; 2],
}

#[derive(Serialize)]
struct GoalChoice {
    value: GoalType,
    label: &'static str,
}

#[derive(Serialize)]
struct OnboardingView {
    step: u8,
    goal_type: Option<GoalType>,
    current_weight: Option<f64>,
    target_weight: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    goal_choices: Vec<GoalChoice>,
    errors: Vec<String>,
}

impl OnboardingView {
    fn new(state: OnboardingState, errors: Vec<String>) -> Self {
        let goal_choices = if state.step == Step::ChooseGoal {
            GOAL_CHOICES
                .iter()
                .map(|&(value, label)| GoalChoice { value, label })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            step: state.step.number(),
            goal_type: state.goal_type,
            current_weight: state.current_weight,
            target_weight: state.target_weight,
            goal_choices,
            errors,
        }
    }
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    /// Failure the user should see verbatim.
    Failed(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Validation(msg) => Self::BadRequest(msg),
            TrackerError::NotFound(msg) => Self::NotFound(msg),
            TrackerError::Unauthorized => Self::Unauthorized(err.to_string()),
            TrackerError::Finalization(_) => Self::Failed(err.to_string()),
            TrackerError::Storage(err) => Self::Internal(err),
        }
    }
}

// --- Middleware ---

/// Load the session named by the cookie, expose it to handlers, and persist it
/// afterwards. Requests carrying the same token run one at a time.
async fn session_layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(token) = session_cookie(request.headers()) else {
        return with_session(&state, None, request, next)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    };

    let lease = state.session_lease(&token);
    let _turn = lease.mutex().lock().await;
    with_session(&state, Some(&token), request, next)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn with_session(
    state: &AppState,
    presented: Option<&str>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (token, data) = state.service().open_session(presented)?;
    let known = presented == Some(token.as_str());

    let session = SessionHandle::new(data);
    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    let (data, ended, cycled) = {
        let slot = session.slot();
        (slot.data.clone(), slot.ended, slot.cycled)
    };
    if ended {
        state.service().end_session(&token)?;
        let mut cleared = build_session_cookie(String::new());
        cleared.make_removal();
        append_cookie(&mut response, &cleared)?;
    } else if cycled {
        let fresh = state.service().cycle_session(&token, &data)?;
        append_cookie(&mut response, &build_session_cookie(fresh))?;
    } else if known || data != SessionData::default() {
        state.service().save_session(&token, &data)?;
        if !known {
            append_cookie(&mut response, &build_session_cookie(token))?;
        }
    }
    Ok(response)
}

async fn require_login(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match request.extensions().get::<SessionHandle>() {
        Some(session) => state.service().authenticated_user(&session.data()),
        None => Ok(None),
    };
    match user {
        Ok(Some(user)) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Ok(None) => Redirect::to("/login").into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health_check() -> &'static str {
    "OK"
}

fn onboarding_response(outcome: OnboardingOutcome) -> Response {
    match outcome {
        OnboardingOutcome::AlreadyAuthenticated | OnboardingOutcome::Completed { .. } => {
            Redirect::to("/dashboard").into_response()
        }
        OnboardingOutcome::InProgress { state, errors } => {
            Json(OnboardingView::new(state, errors)).into_response()
        }
    }
}

async fn show_onboarding(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, ApiError> {
    let outcome = state.service().onboarding_status(&session.data())?;
    Ok(onboarding_response(outcome))
}

async fn submit_onboarding(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<OnboardingForm>,
) -> Result<Response, ApiError> {
    let outcome = {
        let svc = state.service();
        let mut slot = session.slot();
        svc.onboard(&mut slot.data, &form)?
    };
    if matches!(outcome, OnboardingOutcome::Completed { .. }) {
        session.cycle_id();
    }
    Ok(onboarding_response(outcome))
}

async fn show_login(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, ApiError> {
    if state.service().authenticated_user(&session.data())?.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    Ok(Json(LoginPage {
        fields: ["username", "password"],
    })
    .into_response())
}

async fn submit_login(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<LoginForm>,
) -> Result<Redirect, ApiError> {
    {
        let svc = state.service();
        let mut slot = session.slot();
        svc.login(&mut slot.data, &form.username, &form.password)?;
    }
    session.cycle_id();
    Ok(Redirect::to("/dashboard"))
}

async fn logout(Extension(session): Extension<SessionHandle>) -> Redirect {
    session.end();
    Redirect::to("/login")
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Dashboard>, ApiError> {
    let today = Local::now().date_naive();
    let dashboard = state.service().dashboard(user.id, today)?;
    Ok(Json(dashboard))
}

async fn progress(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ProgressReport>, ApiError> {
    let report = state.service().progress(user.id)?;
    Ok(Json(report))
}

async fn get_meal_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<FoodEntry>>, ApiError> {
    let today = Local::now().date_naive();
    let entries = state.service().entries_for_date(user.id, today)?;
    Ok(Json(entries))
}

async fn add_food(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Form(form): Form<FoodForm>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.service().add_food(user.id, &form)?;
    Ok(([(HX_TRIGGER, MEAL_LIST_UPDATED)], Json(entry)))
}

async fn delete_food(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.service().delete_food(user.id, id)?;
    Ok((
        [(HX_TRIGGER, MEAL_LIST_UPDATED)],
        Json(DeletedResponse { deleted: id }),
    ))
}

fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/progress", get(progress))
        .route("/get_meal_list", get(get_meal_list))
        .route("/get_daily_summary", get(dashboard))
        .route("/add_food", post(add_food))
        .route("/delete_food/{id}", post(delete_food))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    Router::new()
        .route("/health-check", get(health_check))
        .route("/onboarding", get(show_onboarding).post(submit_onboarding))
        .route("/login", get(show_login).post(submit_login))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: TrackerService, port: u16, bind: &str) -> anyhow::Result<()> {
    service.purge_stale_sessions(chrono::Duration::seconds(SESSION_MAX_AGE_SECS))?;

    let app = build_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const PASSWORD: &str = "tracking-2024";

    fn test_app() -> Router {
        build_router(AppState::new(TrackerService::new_in_memory().unwrap()))
    }

    async fn send(app: &Router, request: axum::http::Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get_req(path: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::get(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(path: &str, body: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::post(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn set_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    /// Walk the whole wizard and return the logged-in session cookie.
    async fn sign_up(app: &Router, username: &str, goal: &str) -> String {
        let form = format!("goal_type={goal}");
        let response = send(app, post_form("/onboarding", &form, None)).await;
        let cookie = set_cookie(&response).unwrap();

        let response = send(
            app,
            post_form(
                "/onboarding",
                "current_weight=80&target_weight=72.5",
                Some(&cookie),
            ),
        )
        .await;
        assert_eq!(body_json(response).await["step"], 3);

        let response = send(
            app,
            post_form(
                "/onboarding",
                &format!("username={username}&password1={PASSWORD}&password2={PASSWORD}"),
                Some(&cookie),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        set_cookie(&response).unwrap()
    }

    #[tokio::test]
    async fn health_check_is_public() {
        let app = test_app();
        let response = send(&app, get_req("/health-check", None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response).is_none());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();
        let response = send(&app, get_req("/health-check", None)).await;

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn protected_routes_redirect_to_login() {
        let app = test_app();
        for path in ["/dashboard", "/progress", "/get_meal_list", "/get_daily_summary"] {
            let response = send(&app, get_req(path, None)).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
            assert_eq!(location(&response), "/login");
        }

        let response = send(&app, post_form("/add_food", "name=Toast&grams=40", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn wrong_method_returns_405() {
        let app = test_app();
        let request = axum::http::Request::delete("/onboarding")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn onboarding_starts_at_step_one() {
        let app = test_app();
        let response = send(&app, get_req("/onboarding", None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["step"], 1);
        assert_eq!(json["goal_choices"].as_array().unwrap().len(), 3);
        assert_eq!(json["goal_choices"][0]["value"], "lose");
        assert_eq!(json["goal_choices"][0]["label"], "Lose Weight");
    }

    #[tokio::test]
    async fn onboarding_invalid_goal_stays_on_step_one() {
        let app = test_app();
        let response = send(&app, post_form("/onboarding", "goal_type=bulk", None)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["step"], 1);
        assert!(json["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn onboarding_bad_weights_report_errors() {
        let app = test_app();
        let response = send(&app, post_form("/onboarding", "goal_type=gain", None)).await;
        let cookie = set_cookie(&response).unwrap();

        let response = send(
            &app,
            post_form(
                "/onboarding",
                "current_weight=abc&target_weight=70",
                Some(&cookie),
            ),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["step"], 2);
        assert_eq!(json["goal_type"], "gain");
        assert_eq!(json["errors"][0], "Current weight must be a number.");
    }

    #[tokio::test]
    async fn onboarding_completion_logs_in() {
        let app = test_app();
        let cookie = sign_up(&app, "alice", "lose").await;

        let response = send(&app, get_req("/dashboard", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["profile"]["goal_type"], "lose");
        assert_eq!(json["profile"]["daily_calorie_goal"], 1500);
        assert_eq!(json["calories_consumed_today"], 0.0);
        assert_eq!(json["calories_remaining"], 1500.0);

        let response = send(&app, get_req("/onboarding", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
    }

    #[tokio::test]
    async fn onboarding_duplicate_username_stays_on_step_three() {
        let app = test_app();
        sign_up(&app, "alice", "lose").await;

        let response = send(&app, post_form("/onboarding", "goal_type=maintain", None)).await;
        let cookie = set_cookie(&response).unwrap();
        send(
            &app,
            post_form("/onboarding", "current_weight=70&target_weight=70", Some(&cookie)),
        )
        .await;
        let response = send(
            &app,
            post_form(
                "/onboarding",
                &format!("username=alice&password1={PASSWORD}&password2={PASSWORD}"),
                Some(&cookie),
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["step"], 3);
        assert_eq!(
            json["errors"][0],
            "A user with that username already exists."
        );
    }

    #[tokio::test]
    async fn add_food_triggers_meal_list_refresh() {
        let app = test_app();
        let cookie = sign_up(&app, "alice", "maintain").await;

        let response = send(
            &app,
            post_form("/add_food", "name=Oats&grams=60&calories=100", Some(&cookie)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("hx-trigger").unwrap(), "meal-list-updated");

        send(
            &app,
            post_form("/add_food", "name=Coffee&grams=200&calories=", Some(&cookie)),
        )
        .await;

        let response = send(&app, get_req("/get_meal_list", Some(&cookie))).await;
        let json = body_json(response).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "Coffee");
        assert!(entries[0]["calories"].is_null());

        let response = send(&app, get_req("/get_daily_summary", Some(&cookie))).await;
        let json = body_json(response).await;
        assert_eq!(json["calories_consumed_today"], 100.0);
        assert_eq!(json["calories_remaining"], 1900.0);
    }

    #[tokio::test]
    async fn add_food_rejects_invalid_input() {
        let app = test_app();
        let cookie = sign_up(&app, "alice", "maintain").await;

        let request = post_form("/add_food", "name=Rice&grams=lots", Some(&cookie));
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("hx-trigger").is_none());
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid input for grams or calories.");

        let response = send(&app, post_form("/add_food", "grams=100", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, get_req("/get_meal_list", Some(&cookie))).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_food_only_for_owner() {
        let app = test_app();
        let alice = sign_up(&app, "alice", "lose").await;
        let bob = sign_up(&app, "bob", "gain").await;

        let response = send(
            &app,
            post_form("/add_food", "name=Toast&grams=40&calories=110", Some(&alice)),
        )
        .await;
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = send(&app, post_form(&format!("/delete_food/{id}"), "", Some(&bob))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, post_form(&format!("/delete_food/{id}"), "", Some(&alice))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("hx-trigger").unwrap(), "meal-list-updated");
        assert_eq!(body_json(response).await["deleted"], id);

        let response = send(&app, post_form(&format!("/delete_food/{id}"), "", Some(&alice))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn progress_lists_daily_totals() {
        let app = test_app();
        let cookie = sign_up(&app, "alice", "lose").await;
        send(
            &app,
            post_form("/add_food", "name=Oats&grams=60&calories=150", Some(&cookie)),
        )
        .await;

        let response = send(&app, get_req("/progress", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["calorie_data"]["dates"].as_array().unwrap().len(), 1);
        assert_eq!(json["calorie_data"]["calories"][0], 150.0);
        assert_eq!(json["weight_trend"]["start_weight"], 80.0);
        assert_eq!(json["weight_trend"]["target_weight"], 72.5);
    }

    #[tokio::test]
    async fn login_and_logout() {
        let app = test_app();
        let signup_cookie = sign_up(&app, "alice", "lose").await;

        let response = send(&app, post_form("/logout", "", Some(&signup_cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        assert_eq!(set_cookie(&response).unwrap(), "portion_session=");

        let response = send(&app, get_req("/dashboard", Some(&signup_cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = send(
            &app,
            post_form("/login", "username=alice&password=wrong-password", None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie(&response).is_none());

        let response = send(
            &app,
            post_form("/login", &format!("username=alice&password={PASSWORD}"), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
        let cookie = set_cookie(&response).unwrap();

        let response = send(&app, get_req("/dashboard", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, get_req("/login", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn login_issues_a_new_session_token() {
        let app = test_app();
        let signup = sign_up(&app, "alice", "lose").await;
        send(&app, post_form("/logout", "", Some(&signup))).await;

        // A session handed out before login, e.g. planted by someone else.
        let response = send(&app, post_form("/onboarding", "goal_type=lose", None)).await;
        let planted = set_cookie(&response).unwrap();

        let form = format!("username=alice&password={PASSWORD}");
        let response = send(&app, post_form("/login", &form, Some(&planted))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = set_cookie(&response).unwrap();
        assert_ne!(cookie, planted);

        let response = send(&app, get_req("/dashboard", Some(&planted))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");

        let response = send(&app, get_req("/dashboard", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn onboarding_completion_issues_a_new_session_token() {
        let app = test_app();
        let response = send(&app, post_form("/onboarding", "goal_type=gain", None)).await;
        let anonymous = set_cookie(&response).unwrap();
        let weights = "current_weight=60&target_weight=65";
        send(&app, post_form("/onboarding", weights, Some(&anonymous))).await;

        let form = format!("username=bob&password1={PASSWORD}&password2={PASSWORD}");
        let response = send(&app, post_form("/onboarding", &form, Some(&anonymous))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = set_cookie(&response).unwrap();
        assert_ne!(cookie, anonymous);

        let response = send(&app, get_req("/dashboard", Some(&anonymous))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let response = send(&app, get_req("/dashboard", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn concurrent_requests_on_one_session_run_in_turn() {
        let app = test_app();
        let response = send(&app, post_form("/onboarding", "goal_type=gain", None)).await;
        let cookie = set_cookie(&response).unwrap();

        let (first, second) = tokio::join!(
            send(
                &app,
                post_form("/onboarding", "current_weight=80&target_weight=75", Some(&cookie)),
            ),
            send(
                &app,
                post_form("/onboarding", "current_weight=90&target_weight=85", Some(&cookie)),
            ),
        );
        let first = body_json(first).await;
        let second = body_json(second).await;
        assert_eq!(first["step"], 3);
        assert_eq!(second["step"], 3);

        // Only one request saw step 2; the other was applied on top of its result.
        let (winner, loser) = if first["errors"].as_array().unwrap().is_empty() {
            (first, second)
        } else {
            (second, first)
        };
        assert!(winner["errors"].as_array().unwrap().is_empty());
        assert!(!loser["errors"].as_array().unwrap().is_empty());
        assert_eq!(loser["current_weight"], winner["current_weight"]);

        let response = send(&app, get_req("/onboarding", Some(&cookie))).await;
        let json = body_json(response).await;
        assert_eq!(json["step"], 3);
        assert_eq!(json["current_weight"], winner["current_weight"]);
    }

    #[tokio::test]
    async fn session_lock_released_when_waiter_is_cancelled() {
        let state = AppState::new(TrackerService::new_in_memory().unwrap());
        let holder = state.session_lease("abc");
        let turn = holder.mutex().lock().await;

        let mut waiter = Box::pin(async {
            let lease = state.session_lease("abc");
            let _turn = lease.mutex().lock().await;
        });
        tokio::select! {
            biased;
            () = &mut waiter => panic!("lock should still be held"),
            () = std::future::ready(()) => {}
        }

        drop(turn);
        drop(holder);
        assert_eq!(state.session_locks.lock().unwrap().len(), 1);
        drop(waiter);
        assert!(state.session_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalization_failure_is_a_500_with_message() {
        let err = TrackerError::Finalization("please try again in a moment".to_string());
        let response = ApiError::from(err).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["error"],
            "could not finish creating your account: please try again in a moment"
        );
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = build_session_cookie("abc123".to_string());
        let rendered = cookie.to_string();
        assert!(rendered.starts_with("portion_session=abc123"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains(&format!("Max-Age={SESSION_MAX_AGE_SECS}")));
    }

    #[test]
    fn session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; portion_session=abc123; other=1"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("portion_session="));
        assert!(session_cookie(&headers).is_none());
    }
}
