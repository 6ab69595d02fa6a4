use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::{Duration, Instant};

use crate::config::AppConfig;

const DEFAULT_SLOW_REQUEST: Duration = Duration::from_secs(1);

/// Fairing that logs one line per HTTP request, at `warn` when the request
/// was slower than [`AppConfig::slow_request`].
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let elapsed = request.local_cache(Instant::now).elapsed();
        let slow_after = request
            .rocket()
            .state::<AppConfig>()
            .map(|config| config.slow_request)
            .unwrap_or(DEFAULT_SLOW_REQUEST);

        let millis = elapsed.as_secs_f64() * 1000.0;
        let status = response.status().code;

        if elapsed >= slow_after {
            log::warn!(
                "{} {} -> {} ({:.2}ms, slow)",
                request.method(),
                request.uri(),
                status,
                millis
            );
        } else {
            log::info!(
                "{} {} -> {} ({:.2}ms)",
                request.method(),
                request.uri(),
                status,
                millis
            );
        }
    }
}
