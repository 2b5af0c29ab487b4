use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::commands::Dispatcher;
use crate::ledger::LedgerError;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Debug)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub internal_token: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let internal_routes = Router::new()
        .route("/command", post(post_command))
        .route("/admin/clear-cooldowns", post(clear_cooldowns))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_internal_ident,
        ));

    Router::new()
        .merge(internal_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .route("/groups/{group_id}/leaderboard", get(group_leaderboard))
        .route("/groups/{group_id}/members/{user_id}", get(member_profile))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

/// Logs any `RouteError` a handler attached to its response.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

/// Binds the API listener and serves it until `shutdown` is cancelled.
#[instrument(skip(state, shutdown))]
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", socket_addr.port()),
        "server ready"
    );

    let app = router(state);
    let server_handle = tokio::task::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        match served {
            Ok(()) => tracing::info!("server stopped"),
            Err(e) => tracing::error!(error = ?e, "server exited with an error"),
        }
    });

    Ok(vec![server_handle])
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    AuthError(StatusCode),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::Ledger(LedgerError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string(), None)
            }

            RouteError::Ledger(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("storage is unavailable"),
                Some(self),
            ),

            RouteError::AuthError(status) => (
                status.to_owned(),
                String::from("invalid authorization header"),
                None,
            ),

            RouteError::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                Some(self),
            ),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::to_bytes;
    use http::header::{AUTHORIZATION, CONTENT_TYPE};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::commands::dice::ScriptedDelta;
    use crate::db::prelude::*;
    use crate::ledger::Ledger;

    const TOKEN: &str = "internal_token";

    fn app_with(token: &str) -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        let state = Arc::new(AppState {
            dispatcher: Dispatcher::new(ledger, Arc::new(ScriptedDelta::new(vec![4])), None),
            internal_token: token.to_string(),
        });

        (store, router(state))
    }

    fn command(token: Option<&str>, user_id: i64, text: &str) -> Request {
        let body = json!({
            "chat": { "kind": "group", "id": -100, "title": "the lads" },
            "user_id": user_id,
            "display_name": format!("user{user_id}"),
            "text": text,
        });

        let mut req = Request::builder()
            .method("POST")
            .uri("/command")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, token);
        }

        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app_with(TOKEN);
        let res = app.oneshot(get("/")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_command_requires_token() {
        let (store, app) = app_with(TOKEN);

        let res = app.clone().oneshot(command(None, 1, "/random")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(res).await["message"],
            "invalid authorization header"
        );

        let res = app
            .oneshot(command(Some("internal_tokem"), 1, "/random"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(store.member_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_locks_internal_routes() {
        let (_, app) = app_with("");
        let res = app.oneshot(command(Some(""), 1, "/random")).await.unwrap();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_roll_then_read_back() {
        let (_, app) = app_with(TOKEN);

        let res = app
            .clone()
            .oneshot(command(Some(TOKEN), 7, "/random"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["reply"], "rolled");
        assert_eq!(body["delta"], 4);
        assert_eq!(body["rank"], 1);

        let res = app
            .clone()
            .oneshot(command(Some(TOKEN), 7, "/random"))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["reply"], "on_cooldown");

        let res = app
            .clone()
            .oneshot(get("/groups/-100/leaderboard?limit=500"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let entries = json_body(res).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["position"], 1);
        assert_eq!(entries[0]["display_name"], "user7");

        let res = app.oneshot(get("/groups/-100/members/7")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let profile = json_body(res).await;
        assert_eq!(profile["rank"], 1);
        assert_eq!(profile["member"]["score"], 4.0);
    }

    #[tokio::test]
    async fn test_unknown_member_is_404() {
        let (_, app) = app_with(TOKEN);
        let res = app.oneshot(get("/groups/-100/members/7")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_group_leaderboard() {
        let (_, app) = app_with(TOKEN);
        let res = app.oneshot(get("/groups/-5/leaderboard")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!([]));
    }

    #[tokio::test]
    async fn test_clear_cooldowns_route() {
        let (store, app) = app_with(TOKEN);
        app.clone()
            .oneshot(command(Some(TOKEN), 1, "/random"))
            .await
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/admin/clear-cooldowns")
            .header(AUTHORIZATION, TOKEN)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!({ "cleared": 1 }));

        let member = store
            .get_member(MemberKey::new(GroupId(-100), UserId(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.cooldown_until, None);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let (store, app) = app_with(TOKEN);
        store.set_unavailable(true);

        let res = app.oneshot(get("/groups/-100/leaderboard")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.extensions().get::<Arc<RouteError>>().is_some());
    }

    #[tokio::test]
    async fn test_cooldown_is_a_reply_not_an_error() {
        let (_, app) = app_with(TOKEN);
        app.clone()
            .oneshot(command(Some(TOKEN), 3, "/random"))
            .await
            .unwrap();

        let res = app
            .oneshot(command(Some(TOKEN), 3, "/random"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.extensions().get::<Arc<RouteError>>().is_none());

        let body = json_body(res).await;
        assert_eq!(body["reply"], "on_cooldown");
        assert!(body["remaining_secs"].as_i64().unwrap() > 0);
    }
}
