//! Placeholder site content so the gate has something to guard.
//!
//! Deployments mount their own pages with [`super::router_with_content`].

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;

use super::escape_html;

pub const CALCULATORS: &[(&str, &str)] = &[
    ("thc-loss", "THC Loss Calculator"),
    ("yield-forecasting", "Yield Forecasting Calculator"),
    ("cost-per-gram", "Cost per Gram Calculator"),
];

pub fn router() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/calculators/{slug}", get(calculator))
        .route("/robots.txt", get(robots))
        .route("/sitemap.xml", get(sitemap))
        .fallback(not_found)
}

async fn home() -> Html<String> {
    let items: String = CALCULATORS
        .iter()
        .map(|(slug, title)| {
            format!(
                "<li><a href=\"/calculators/{}\">{}</a></li>\n",
                slug,
                escape_html(title)
            )
        })
        .collect();
    Html(page("Calculators", &format!("<ul>\n{}</ul>", items)))
}

async fn calculator(Path(slug): Path<String>) -> Response {
    match CALCULATORS.iter().find(|(known, _)| *known == slug) {
        Some((slug, title)) => Html(page(
            title,
            &format!(
                "<section data-calculator=\"{}\"></section>",
                escape_html(slug)
            ),
        ))
        .into_response(),
        None => not_found().await.into_response(),
    }
}

async fn robots() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        "User-agent: *\nAllow: /\nSitemap: /sitemap.xml\n",
    )
}

async fn sitemap() -> impl IntoResponse {
    let urls: String = std::iter::once("/".to_string())
        .chain(
            CALCULATORS
                .iter()
                .map(|(slug, _)| format!("/calculators/{}", slug)),
        )
        .map(|loc| format!("  <url><loc>{}</loc></url>\n", loc))
        .collect();
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        )],
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{}</urlset>\n",
            urls
        ),
    )
}

async fn not_found() -> (StatusCode, Html<String>) {
    (StatusCode::NOT_FOUND, Html(page("Not found", "<p>Page not found.</p>")))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<h1>{}</h1>\n{}\n</body>\n</html>\n",
        escape_html(title),
        escape_html(title),
        body
    )
}
