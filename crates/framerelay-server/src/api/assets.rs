use axum::{http::header, response::Html, response::IntoResponse};

const INDEX_HTML: &str = include_str!("../../static/index.html");
const CLIENT_JS: &str = include_str!("../../static/client.js");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn client_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
}
