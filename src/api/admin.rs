use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{
        admin::{ResetResponse, StatsResponse},
        auth::AdminToken,
    },
    settings::Settings,
};
use crate::service::VotingService;

pub fn routes() -> Vec<Route> {
    routes![get_settings, update_settings, stats, reset]
}

#[get("/settings")]
async fn get_settings(service: &State<VotingService>) -> Result<Json<Settings>> {
    Ok(Json(service.settings().await?))
}

#[post("/settings", data = "<settings>", format = "json")]
async fn update_settings(
    token: AdminToken,
    settings: Json<Settings>,
    service: &State<VotingService>,
) -> Result<Json<Settings>> {
    info!("Settings changed by {}", token.username);
    Ok(Json(service.update_settings(settings.0).await?))
}

#[get("/admin/stats")]
async fn stats(_token: AdminToken, service: &State<VotingService>) -> Result<Json<StatsResponse>> {
    let snapshot = service.stats().await?;
    Ok(Json(snapshot.into()))
}

#[post("/admin/reset")]
async fn reset(token: AdminToken, service: &State<VotingService>) -> Result<Json<ResetResponse>> {
    warn!("Reset requested by {}", token.username);
    service.reset().await?;
    Ok(Json(ResetResponse::done()))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Cookie, Header, Status},
        local::asynchronous::Client,
        serde::json::serde_json::Value,
    };

    use super::*;
    use crate::model::{api::auth::AUTH_TOKEN_COOKIE, ballot::Selections, voter::VoterProfile};
    use crate::test_support::{admin_bearer, admin_jwt};

    async fn cast_vote(service: &VotingService, profile: &VoterProfile, candidate: &str) {
        let token = service.verify(profile).await.unwrap();
        service
            .submit_vote(
                &token.to_string(),
                Selections::new().with("headBoy", Some(candidate)),
            )
            .await
            .unwrap();
    }

    #[backend_test]
    async fn admin_routes_need_a_token(client: Client) {
        for response in [
            client.get(uri!(stats)).dispatch().await,
            client.post(uri!(reset)).dispatch().await,
            client
                .post(uri!(update_settings))
                .header(ContentType::JSON)
                .body(r#"{"votingEnabled": false}"#)
                .dispatch()
                .await,
        ] {
            assert_eq!(Status::Unauthorized, response.status());
            let body: Value = response.into_json().await.unwrap();
            assert_eq!(body["error"], "Unauthorized");
        }

        // Nor does a malformed one.
        let response = client
            .get(uri!(stats))
            .header(Header::new("Authorization", "Bearer not.a.jwt"))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());

        // Settings remain public to read.
        let response = client.get(uri!(get_settings)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let settings: Settings = response.into_json().await.unwrap();
        assert!(settings.voting_enabled);
    }

    #[backend_test]
    async fn toggle_voting(client: Client) {
        let response = client
            .post(uri!(update_settings))
            .header(admin_bearer(&client))
            .header(ContentType::JSON)
            .json(&Settings {
                voting_enabled: false,
            })
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let settings: Settings = client
            .get(uri!(get_settings))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(!settings.voting_enabled);

        let service = client.rocket().state::<VotingService>().unwrap();
        assert!(service.verify(&VoterProfile::example()).await.is_err());
    }

    #[backend_test]
    async fn stats_and_reset(client: Client) {
        let service = client.rocket().state::<VotingService>().unwrap();
        cast_vote(service, &VoterProfile::example(), "Alice").await;
        cast_vote(service, &VoterProfile::example2(), "Bob").await;

        // The cookie works as well as the header.
        let response = client
            .get(uri!(stats))
            .cookie(Cookie::new(AUTH_TOKEN_COOKIE, admin_jwt(&client)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let report: StatsResponse = response.into_json().await.unwrap();
        assert_eq!(report.total_voters, 2);
        assert_eq!(report.tally.count("headBoy", "Alice"), 1);
        assert_eq!(report.tally.count("headBoy", "Bob"), 1);
        assert!(report.roll[0].voted_at <= report.roll[1].voted_at);

        let response = client
            .post(uri!(reset))
            .header(admin_bearer(&client))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let report: StatsResponse = client
            .get(uri!(stats))
            .header(admin_bearer(&client))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(report.total_voters, 0);
        assert!(report.tally.is_empty());

        // Everyone may vote again.
        cast_vote(service, &VoterProfile::example(), "Bob").await;
    }
}
