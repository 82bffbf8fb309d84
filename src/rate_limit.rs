use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};

use crate::error::Error;

/// Fixed-window request counting per client address.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max: u32,
    windows: Arc<Mutex<HashMap<IpAddr, RateWindow>>>,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            windows: Arc::default(),
        }
    }

    /// Count a request from `addr`, returning whether it is within the limit.
    pub fn admit(&self, addr: IpAddr, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(addr).or_insert(RateWindow {
            count: 0,
            reset_at: now + self.window,
        });
        if window.reset_at <= now {
            *window = RateWindow {
                count: 0,
                reset_at: now + self.window,
            };
        }
        if window.count >= self.max {
            return false;
        }
        window.count += 1;
        true
    }

    /// Forget windows that have run out. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> u64 {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, window| window.reset_at > now);
        (before - windows.len()) as u64
    }
}

/// Request guard that counts the request against the client's rate limit.
pub struct Admitted;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Admitted {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(limiter) = req.rocket().state::<RateLimiter>() else {
            error!("Rate limiter is not managed");
            return Outcome::Error((
                Status::InternalServerError,
                Error::Status(Status::InternalServerError, "Server misconfigured".into()),
            ));
        };
        let Some(addr) = req.client_ip() else {
            warn!("Cannot rate limit a request with no client address");
            return Outcome::Success(Admitted);
        };

        if limiter.admit(addr, Utc::now()) {
            Outcome::Success(Admitted)
        } else {
            warn!("Rate limit exceeded for {addr}");
            Outcome::Error((Status::TooManyRequests, Error::RateLimited))
        }
    }
}
