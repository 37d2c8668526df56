//! Test helpers shared by `fetch-throttle-lib` and `fetch-throttle`.
//!
//! The crate depends on neither of them. Its helpers are macros, so the
//! importing crate provides `wiremock` and `http`.

/// Start a mock web server answering every `GET` with the given status.
///
/// Further arguments are applied to the `wiremock::ResponseTemplate`, e.g.
/// `mock_server!(StatusCode::OK, set_delay(Duration::from_millis(50)))`.
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Mount a `GET` route at `$path` on an existing mock server, answering
/// with the given status and expecting exactly `$hits` calls.
#[macro_export]
macro_rules! mount_route {
    ($server:expr, $path:expr, $status:expr, $hits:expr) => {{
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path($path))
            .respond_with(wiremock::ResponseTemplate::new(http::StatusCode::from($status)))
            .expect($hits)
            .mount(&$server)
            .await;
    }};
}
