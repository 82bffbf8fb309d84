use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    Data, Orbit, Request, Response, Rocket,
};

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

/// Per-request bookkeeping, cached on the request when it arrives.
#[derive(Debug, Clone, Copy)]
struct RequestTrace {
    id: RequestId,
    received: Instant,
}

impl RequestTrace {
    fn start() -> Self {
        Self {
            id: RequestId::next(),
            received: Instant::now(),
        }
    }

    fn of<'r>(req: &'r Request<'_>) -> &'r Self {
        req.local_cache(Self::start)
    }
}

/// Logs every request and response, plus launch and shutdown.
///
/// Requests are logged with the client address the rate limiter sees. Nothing
/// from the request body is logged, so voter profiles never reach the logs.
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
        let config = rocket.config();
        let protocol = if config.tls_enabled() { "https" } else { "http" };
        info!(
            "Server launched on {protocol}://{}:{}",
            config.address, config.port
        );
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = RequestTrace::of(req).id;
        let client = req
            .client_ip()
            .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        info!("->req{id} {} {} from {client}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let trace = RequestTrace::of(req);
        let status = res.status();
        let route = req
            .route()
            .map_or_else(|| "UNKNOWN ROUTE".to_string(), |r| r.uri.to_string());
        let elapsed = trace.received.elapsed().as_millis();

        let log_msg = format!("<-rsp{} {status} {route} ({elapsed}ms)", trace.id);
        match status.class() {
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_increase() {
        let first = RequestTrace::start();
        let second = RequestTrace::start();
        assert!(second.id > first.id);
        assert!(second.received >= first.received);
    }
}
