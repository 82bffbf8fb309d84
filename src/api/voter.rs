use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::voter::{CancelRequest, CheckVoterResponse, VoteRequest, VoteResponse},
    voter::VoterProfile,
};
use crate::rate_limit::Admitted;
use crate::service::VotingService;

pub fn routes() -> Vec<Route> {
    routes![check_voter, vote, cancel_session]
}

#[post("/check-voter", data = "<profile>", format = "json")]
async fn check_voter(
    _admitted: Admitted,
    profile: Json<VoterProfile>,
    service: &State<VotingService>,
) -> Result<Json<CheckVoterResponse>> {
    let token = service.verify(&profile).await?;
    Ok(Json(CheckVoterResponse::verified(token)))
}

#[post("/vote", data = "<request>", format = "json")]
async fn vote(
    _admitted: Admitted,
    request: Json<VoteRequest>,
    service: &State<VotingService>,
) -> Result<Json<VoteResponse>> {
    service
        .submit_ballot(&request.session_token, || request.selections())
        .await?;
    Ok(Json(VoteResponse::recorded()))
}

#[post("/session/cancel", data = "<request>", format = "json")]
async fn cancel_session(
    _admitted: Admitted,
    request: Json<CancelRequest>,
    service: &State<VotingService>,
) -> Result<()> {
    service.cancel(&request.session_token).await
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, serde_json::Value},
    };

    use super::*;
    use crate::model::api::admin::StatsResponse;
    use crate::test_support::CLIENT_ADDR;

    async fn check(client: &Client, profile: &VoterProfile) -> (Status, Value) {
        let response = client
            .post(uri!(check_voter))
            .remote(CLIENT_ADDR)
            .header(ContentType::JSON)
            .json(profile)
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json().await.unwrap())
    }

    async fn cast(client: &Client, body: Value) -> (Status, Value) {
        let response = client
            .post(uri!(vote))
            .remote(CLIENT_ADDR)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json().await.unwrap())
    }

    #[backend_test]
    async fn verify_and_vote(client: Client) {
        let (status, body) = check(&client, &VoterProfile::example()).await;
        assert_eq!(Status::Ok, status);
        assert_eq!(body["success"], true);
        assert_eq!(body["hasVoted"], false);
        let token = body["sessionToken"].as_str().unwrap().to_string();

        let (status, body) = cast(
            &client,
            json!({
                "sessionToken": token,
                "headBoyVote": "Alice",
                "headGirlVote": "",
            }),
        )
        .await;
        assert_eq!(Status::Ok, status);
        assert_eq!(body["success"], true);

        // Voting again is refused, whatever the formatting.
        let mut again = VoterProfile::example();
        again.name = "JANE DOE ".to_string();
        let (status, body) = check(&client, &again).await;
        assert_eq!(Status::Conflict, status);
        assert_eq!(body["success"], false);
        assert_eq!(body["hasVoted"], true);
        assert_eq!(body["error"], "AlreadyVoted");

        let service = client.rocket().state::<VotingService>().unwrap();
        let stats = StatsResponse::from(service.stats().await.unwrap());
        assert_eq!(stats.total_voters, 1);
        assert_eq!(stats.tally.count("headBoy", "Alice"), 1);
    }

    #[backend_test]
    async fn refusals(client: Client) {
        // Missing fields.
        let (status, body) = check(
            &client,
            &VoterProfile {
                name: " ".to_string(),
                ..VoterProfile::example()
            },
        )
        .await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["error"], "InvalidProfile");

        let (_, body) = check(&client, &VoterProfile::example()).await;
        let token = body["sessionToken"].as_str().unwrap().to_string();

        // A second verification while the first session is live.
        let (status, body) = check(&client, &VoterProfile::example()).await;
        assert_eq!(Status::Conflict, status);
        assert_eq!(body["error"], "SessionInProgress");

        // Nobody chosen.
        let (status, body) = cast(
            &client,
            json!({ "sessionToken": token, "headBoyVote": "none" }),
        )
        .await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["error"], "NoSelection");

        // Bad token.
        let (status, body) = cast(
            &client,
            json!({ "sessionToken": "nope", "headBoyVote": "Alice" }),
        )
        .await;
        assert_eq!(Status::Unauthorized, status);
        assert_eq!(body["error"], "SessionExpired");

        // A bad token is reported before a malformed vote field.
        let (status, body) = cast(
            &client,
            json!({ "sessionToken": "nope", "headBoyVote": 7 }),
        )
        .await;
        assert_eq!(Status::Unauthorized, status);
        assert_eq!(body["error"], "SessionExpired");

        // With a live session, the malformed field is the problem.
        let (status, body) = cast(
            &client,
            json!({ "sessionToken": token, "headBoyVote": 7 }),
        )
        .await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["error"], "BadRequest");

        // Malformed JSON is still answered in JSON.
        let response = client
            .post(uri!(vote))
            .header(ContentType::JSON)
            .body("{")
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[backend_test]
    async fn cancel_frees_the_voter(client: Client) {
        let (_, body) = check(&client, &VoterProfile::example()).await;
        let token = body["sessionToken"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let response = client
                .post(uri!(cancel_session))
                .remote(CLIENT_ADDR)
                .header(ContentType::JSON)
                .json(&CancelRequest {
                    session_token: token.clone(),
                })
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
        }

        let (status, _) = check(&client, &VoterProfile::example()).await;
        assert_eq!(Status::Ok, status);

        // The cancelled token no longer works.
        let (status, _) = cast(
            &client,
            json!({ "sessionToken": token, "headBoyVote": "Alice" }),
        )
        .await;
        assert_eq!(Status::Unauthorized, status);
    }

    #[backend_test]
    async fn rate_limited(client: Client) {
        let max = client
            .rocket()
            .state::<crate::config::Config>()
            .unwrap()
            .rate_limit_max();
        for _ in 0..max {
            let response = client
                .post(uri!(cancel_session))
                .remote(CLIENT_ADDR)
                .header(ContentType::JSON)
                .json(&CancelRequest {
                    session_token: String::new(),
                })
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
        }

        let (status, body) = check(&client, &VoterProfile::example()).await;
        assert_eq!(Status::TooManyRequests, status);
        assert_eq!(body["error"], "RateLimited");
    }
}
