use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};

use crate::db::SubscriberStore;

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Subscribe to Tweet Monitoring</title></head>
<body>
<h1>Subscribe to Tweet Monitoring</h1>
<form method="post" action="/subscribe">
<input type="email" name="email" placeholder="you@example.com" required>
<button type="submit">Subscribe</button>
</form>
</body>
</html>
"#;

type Fields = Vec<(String, String)>;

pub fn router<S>(store: Arc<S>) -> Router
where
    S: SubscriberStore + 'static,
{
    Router::new()
        .route("/", get(form_page))
        .route("/subscribe", post(subscribe::<S>))
        .with_state(store)
}

async fn form_page() -> Html<&'static str> {
    Html(FORM_PAGE)
}

/// Takes the first `email` field, body fields before query-string ones.
///
/// A body that is not url-encoded counts as carrying no fields.
async fn subscribe<S>(
    State(store): State<Arc<S>>,
    query: Result<Query<Fields>, QueryRejection>,
    form: Result<Form<Fields>, FormRejection>,
) -> Response
where
    S: SubscriberStore,
{
    let form = form.map(|Form(fields)| fields).unwrap_or_default();
    let query = query.map(|Query(fields)| fields).unwrap_or_default();
    let email = form
        .iter()
        .chain(&query)
        .find_map(|(name, value)| (name == "email").then_some(value.trim()))
        .unwrap_or_default();
    if email.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing email parameter").into_response();
    }

    if let Err(e) = store.add_subscriber(email).await {
        tracing::error!(target: "subscribe", "\x1b[31mfailed to add {email}: {e}\x1b[0m");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to add subscriber").into_response();
    }

    tracing::info!(target: "subscribe", "\x1b[36mnew subscriber {email}\x1b[0m");
    format!("Subscriber added: {email}").into_response()
}
