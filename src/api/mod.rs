use rocket::{http::Status, response::status::Custom, serde::json::Json, Catcher, Request, Route};

use crate::error::{Error, ErrorBody};

mod admin;
mod voter;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voter::routes());
    routes.extend(admin::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render failures that never reached a handler (guards, malformed bodies,
/// unknown routes) in the same shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> Custom<Json<ErrorBody>> {
    let err = match status.code {
        429 => Error::RateLimited,
        401 => Error::Unauthorized,
        _ => Error::Status(status, status.reason_lossy().to_string()),
    };
    Custom(status, Json(ErrorBody::from(&err)))
}
