//! The HTTP surface this hub keeps in scope: `POST /`, `GET /`, `GET
//! /healthcheck`, `GET /info`. Everything under `/admin/` is out of scope
//! and is not served here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use hub_common::entities::HashAlgorithm;
use hub_engine::{Manager, PublishOutcome, SubscribeRequest, SubscriptionOutcome, ValidationIssue};
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::Store;
use serde::Deserialize;
use url::Url;

/// Shared handler state, generic over the backend's pool resource manager
/// the same way every other `hub-engine` component is.
pub struct AppState<RM> {
    pub store: Store<RM>,
    pub manager: Manager<RM>,
    pub self_base_url: Url,
}

pub fn router<RM>(state: Arc<AppState<RM>>) -> Router
where
    RM: DatabasePool + 'static,
{
    Router::new()
        .route("/", get(index::<RM>).post(dispatch::<RM>))
        .route("/healthcheck", get(healthcheck::<RM>))
        .route("/info", get(info::<RM>))
        .with_state(state)
}

async fn index<RM>(State(state): State<Arc<AppState<RM>>>) -> Html<String>
where
    RM: DatabasePool + 'static,
{
    Html(format!(
        "<html><body><h1>WebSub hub</h1><p>This is a <a href=\"https://www.w3.org/TR/websub/\">WebSub</a> hub at {}.</p></body></html>",
        state.self_base_url
    ))
}

/// `GET /healthcheck`: `200` if the store answers a trivial query,
/// non-2xx otherwise.
async fn healthcheck<RM>(State(state): State<Arc<AppState<RM>>>) -> StatusCode
where
    RM: DatabasePool + 'static,
{
    let probe = Url::parse("https://healthcheck.invalid/").expect("static url");
    match state.store.get_topic_by_url(&probe).await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(%err, "healthcheck query failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    topic: String,
    #[serde(default)]
    format: Option<String>,
}

/// `GET /info?topic=<url>&format=<svg|json|text>`.
async fn info<RM>(State(state): State<Arc<AppState<RM>>>, Query(query): Query<InfoQuery>) -> Response
where
    RM: DatabasePool + 'static,
{
    let topic_url = match Url::parse(&query.topic) {
        Ok(url) => url,
        Err(_) => return (StatusCode::BAD_REQUEST, "topic must be an absolute URL").into_response(),
    };

    let count = match state.store.subscription_count_by_topic_url(&topic_url).await {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(%err, "info query failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match query.format.as_deref() {
        Some("json") => axum::Json(serde_json::json!({ "topic": topic_url.to_string(), "subscribers": count }))
            .into_response(),
        Some("svg") => (
            [("content-type", "image/svg+xml")],
            format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="20"><text x="5" y="14">{count} subscribers</text></svg>"#
            ),
        )
            .into_response(),
        _ => (
            [("content-type", "text/plain")],
            format!("{count} subscriber(s)"),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct PublishSubscribeForm {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.callback")]
    callback: Option<String>,
    #[serde(rename = "hub.topic")]
    topic: Option<String>,
    #[serde(rename = "hub.url")]
    url: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    lease_seconds: Option<i64>,
    #[serde(rename = "hub.secret")]
    secret: Option<String>,
}

/// `POST /` with `application/x-www-form-urlencoded`.
async fn dispatch<RM>(
    State(state): State<Arc<AppState<RM>>>,
    axum::extract::ConnectInfo(remote_addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
    headers: axum::http::HeaderMap,
    Form(form): Form<PublishSubscribeForm>,
) -> Response
where
    RM: DatabasePool + 'static,
{
    let http_from = headers
        .get(axum::http::header::FROM)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match form.mode.as_str() {
        "publish" => {
            let topic_url = form.url.or(form.topic).unwrap_or_default();
            match state.manager.publish(&topic_url).await {
                Ok(outcome) => publish_response(outcome),
                Err(err) => internal_error(err),
            }
        }
        "subscribe" | "unsubscribe" => {
            let request = SubscribeRequest {
                callback: form.callback.unwrap_or_default(),
                topic_url: form.topic.unwrap_or_default(),
                lease_seconds: form.lease_seconds,
                secret: form.secret,
                signature_algorithm: HashAlgorithm::default(),
                http_remote_addr: Some(remote_addr.to_string()),
                http_from,
            };
            let outcome = if form.mode == "subscribe" {
                state.manager.subscribe(request).await
            } else {
                state.manager.unsubscribe(request).await
            };
            match outcome {
                Ok(outcome) => subscription_response(outcome),
                Err(err) => internal_error(err),
            }
        }
        other => (
            StatusCode::BAD_REQUEST,
            format!("hub.mode must be one of subscribe, unsubscribe, publish; got {other:?}"),
        )
            .into_response(),
    }
}

fn publish_response(outcome: PublishOutcome) -> Response {
    respond(outcome.accepted(), &outcome.issues)
}

fn subscription_response(outcome: SubscriptionOutcome) -> Response {
    respond(outcome.accepted(), &outcome.issues)
}

fn respond(accepted: bool, issues: &[ValidationIssue]) -> Response {
    let body = issues
        .iter()
        .map(|issue| format!("{:?} {}: {}", issue.severity, issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("\n");

    let status = if accepted { StatusCode::ACCEPTED } else { StatusCode::BAD_REQUEST };
    (status, body).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(%err, "request handling failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use hub_common::config::HubConfig;
    use hub_common::entities::TopicLeaseDefaults;
    use hub_common::Backoff;
    use hub_engine::{FetchEngine, VerificationEngine};
    use tower::ServiceExt;

    use super::*;

    async fn test_app() -> (Router, hub_sqlite::SqliteStore) {
        let store = hub_sqlite::memory().await.expect("memory store");
        let config = HubConfig {
            public_hub: true,
            process_immediately: false,
            ..HubConfig::default()
        };
        let http = hub_http::HttpClient::new("test/1.0", Duration::from_secs(5)).expect("client");
        let fetch = Arc::new(FetchEngine::new(
            store.clone(),
            http.clone(),
            Url::parse(&config.self_base_url).expect("self base url"),
            config.strict_topic_hub_link,
            Backoff::default(),
        ));
        let verification = Arc::new(VerificationEngine::new(store.clone(), http, Backoff::default()));
        let manager = Manager::new(
            store.clone(),
            fetch,
            verification,
            config.clone(),
            TopicLeaseDefaults::default(),
            300,
            "test-node".to_owned(),
        );
        let state = Arc::new(AppState {
            store: store.clone(),
            manager,
            self_base_url: Url::parse(&config.self_base_url).expect("self base url"),
        });
        (router(state), store)
    }

    fn connect_info_request(builder: axum::http::request::Builder, body: Body) -> Request<Body> {
        builder
            .extension(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))))
            .body(body)
            .expect("request")
    }

    #[tokio::test]
    async fn healthcheck_returns_200() {
        let (app, _store) = test_app().await;
        let response = app
            .oneshot(connect_info_request(
                Request::builder().method("GET").uri("/healthcheck"),
                Body::empty(),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn info_reports_zero_subscribers_for_unknown_topic() {
        let (app, _store) = test_app().await;
        let response = app
            .oneshot(connect_info_request(
                Request::builder()
                    .method("GET")
                    .uri("/info?topic=https%3A%2F%2Fpublisher.example%2Ffeed&format=text"),
                Body::empty(),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], b"0 subscriber(s)");
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_under_public_hub_is_accepted() {
        let (app, _store) = test_app().await;
        let response = app
            .oneshot(connect_info_request(
                Request::builder().method("POST").uri("/").header(
                    "content-type",
                    "application/x-www-form-urlencoded",
                ),
                Body::from("hub.mode=publish&hub.url=https%3A%2F%2Fpublisher.example%2Ffeed"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn subscribe_with_invalid_callback_is_rejected() {
        let (app, _store) = test_app().await;
        let response = app
            .oneshot(connect_info_request(
                Request::builder().method("POST").uri("/").header(
                    "content-type",
                    "application/x-www-form-urlencoded",
                ),
                Body::from("hub.mode=subscribe&hub.callback=not-a-url&hub.topic=https%3A%2F%2Fpublisher.example%2Ffeed"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
