use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

const BEARER_PREFIX: &str = "Bearer ";

/// Proof that the request carries a valid administrator token.
///
/// Tokens are issued by the administrator login service, signed with the
/// shared `jwt_secret`. They may arrive in the [`AUTH_TOKEN_COOKIE`] cookie or
/// an `Authorization: Bearer` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminToken {
    #[serde(rename = "sub")]
    pub username: String,
}

impl AdminToken {
    /// Verify and decode a raw token.
    pub fn decode(token: &str, config: &Config) -> Result<Self> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }
}

/// Token claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AdminToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            error!("Config is not managed");
            return Outcome::Error((
                Status::InternalServerError,
                Error::Status(Status::InternalServerError, "Server misconfigured".into()),
            ));
        };

        let bearer = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix(BEARER_PREFIX));
        let cookie = req.cookies().get(AUTH_TOKEN_COOKIE).map(|c| c.value());
        let Some(raw) = bearer.or(cookie) else {
            return Outcome::Error((Status::Unauthorized, Error::Unauthorized));
        };

        match Self::decode(raw.trim(), config) {
            Ok(token) => Outcome::Success(token),
            Err(e) => {
                warn!("Rejected administrator token: {e}");
                Outcome::Error((Status::Unauthorized, Error::Unauthorized))
            }
        }
    }
}

#[cfg(test)]
mod examples {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    impl AdminToken {
        pub fn example() -> Self {
            Self {
                username: "returning-officer".to_string(),
            }
        }

        /// Sign this token as the login service would.
        pub fn sign(self, secret: &[u8], ttl: Duration) -> String {
            let claims = Claims {
                token: self,
                expire_at: Utc::now() + ttl,
            };
            jsonwebtoken::encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(secret),
            )
            .unwrap()
        }
    }
}
