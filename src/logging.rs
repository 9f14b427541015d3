use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shown in place of a ticket token in anything that gets logged.
pub const REDACTED: &str = "<token>";

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Allow the ID to be accessed via request guard.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = (); // No errors possible, use the `!` type once stabilised.

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// Hide the token in a ticket path (`/ticket/<assembly>/<ticket>/<token>`).
///
/// Any other path is returned unchanged.
pub fn redact_path(path: &str) -> Cow<'_, str> {
    let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
    match segments.as_slice() {
        ["ticket", assembly_id, ticket_id, token, ..] if !token.is_empty() => {
            let rest = &segments[4..];
            let mut redacted = format!("/ticket/{assembly_id}/{ticket_id}/{REDACTED}");
            for segment in rest {
                redacted.push('/');
                redacted.push_str(segment);
            }
            Cow::Owned(redacted)
        }
        _ => Cow::Borrowed(path),
    }
}

/// A rocket fairing that does global logging, e.g. logging every request and response.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Server launched on {protocol}://{ip}:{port}");
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        // Assign an ID.
        let id = req.local_cache(RequestId::next);
        let method = req.method();
        // Tokens in the path must never reach the log.
        let path = redact_path(req.uri().path().as_str());
        info!("->req{id} {method} {path}");
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = req.local_cache(RequestId::next);
        let code = res.status();
        // Get the matched route.
        let route = match req.route() {
            Some(r) => {
                let mut str = r.uri.to_string();
                if let Some(ref name) = r.name {
                    str = format!("{name} ({str})");
                }
                str
            }
            None => "UNKNOWN ROUTE".to_string(),
        };
        let log_msg = format!("<-rsp{id} {code} {route}");
        match code.class() {
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
    }
}

/// Route every log record into a buffer for the duration of a test, while
/// still printing this crate's own records. Only one test holding the guard
/// runs at a time, since there is a single global logger.
#[cfg(test)]
pub fn capture_logs() -> (
    std::sync::MutexGuard<'static, ()>,
    log4rs_test_utils::log_testing::LogsHandle,
) {
    use log::LevelFilter;
    use log4rs::{
        config::{Appender, Logger, Root},
        encode::pattern::PatternEncoder,
    };
    use log4rs_test_utils::{
        log_testing::{logging_test_setup, MockAppender},
        test_logging::TestConsoleAppender,
    };

    let (captured, logs) = MockAppender::new(Box::new(PatternEncoder::new("{l} {t} {m}")));
    let console = TestConsoleAppender::new(Box::new(PatternEncoder::new("{l} {M}::{L} {m}{n}")));
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("captured", Box::new(captured)))
        .appender(Appender::builder().build("console", Box::new(console)))
        .logger(
            Logger::builder()
                .appender("console")
                .build(env!("CARGO_CRATE_NAME"), LevelFilter::Trace),
        )
        .build(Root::builder().appender("captured").build(LevelFilter::Trace))
        .unwrap();
    (logging_test_setup(config), logs)
}
