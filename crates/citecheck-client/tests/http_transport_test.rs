//! Integration tests for the HTTP validation transport.
//!
//! A wiremock server stands in for the validation backend so request shapes,
//! headers, and error mapping are checked end to end.

use citecheck_client::{ClientConfig, HttpTransport};
use citecheck_core::{
    Error, JobStatus, MatchStatus, UpgradeEvent, UserTier, ValidationRequest, ValidationTransport,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(ClientConfig::default().with_base_url(server.uri()))
        .expect("Failed to create transport")
}

fn request(citations: &[&str]) -> ValidationRequest {
    ValidationRequest {
        citations: citations.iter().map(|c| c.to_string()).collect(),
        style: "apa7".to_string(),
        document_id: None,
        model_preference: Some("model_a".to_string()),
    }
}

#[tokio::test]
async fn test_sync_validate_posts_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/validate"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({
            "citations": ["Smith, J. (2020). Title. Journal, 1(2), 3-4."],
            "style": "apa7",
            "model_preference": "model_a"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "citation_number": 1,
                "original": "Smith, J. (2020). Title. Journal, 1(2), 3-4.",
                "source_type": "journal",
                "errors": []
            }],
            "user_status": {"type": "credits", "balance": 99}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = transport(&mock_server)
        .validate(&request(&["Smith, J. (2020). Title. Journal, 1(2), 3-4."]))
        .await
        .expect("Request should succeed");

    assert_eq!(result.results.len(), 1);
    assert!(result.results[0].is_perfect());
    let user = result.user_status.unwrap();
    assert_eq!(user.tier, UserTier::Credits);
    assert_eq!(user.balance, Some(99));
}

#[tokio::test]
async fn test_async_submit_returns_job_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/validate/async"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "job-abc",
            "status": "pending",
            "experiment_variant": 2
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let submission = transport(&mock_server)
        .submit(&request(&["A"]))
        .await
        .unwrap();

    assert_eq!(submission.job_id, "job-abc");
    assert_eq!(submission.status, JobStatus::Pending);
    assert_eq!(submission.experiment_variant, Some(2));
}

#[tokio::test]
async fn test_async_submit_empty_job_id_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/validate/async"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"job_id": "", "status": "pending"})),
        )
        .mount(&mock_server)
        .await;

    let err = transport(&mock_server)
        .submit(&request(&["A"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
}

#[tokio::test]
async fn test_job_status_with_flat_inline_results() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "results": {
                "results": [
                    {"citation_number": 1, "original": "A"},
                    {"citation_number": 2, "original": "B"}
                ],
                "inline_results": [
                    {"id": "i1", "matched_ref_index": 0, "match_status": "matched"},
                    {"id": "i2", "matched_ref_index": null, "match_status": "orphan"}
                ],
                "orphans": [
                    {"id": "i2", "matched_ref_index": null, "match_status": "orphan"}
                ],
                "user_status": {"type": "pass"}
            }
        })))
        .mount(&mock_server)
        .await;

    let status = transport(&mock_server).job_status("job-1").await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    let payload = status.results.unwrap();
    assert_eq!(payload.results.unwrap().len(), 2);
    let inline = payload.inline_results.unwrap();
    assert_eq!(inline[0].match_status, MatchStatus::Matched);
    assert_eq!(inline[1].matched_ref_index, None);
    assert_eq!(payload.orphans.unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_status_pending_null_results() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/job-2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "pending", "results": null})),
        )
        .mount(&mock_server)
        .await;

    let status = transport(&mock_server).job_status("job-2").await.unwrap();
    assert_eq!(status.status, JobStatus::Pending);
    assert!(status.results.is_none());
}

#[tokio::test]
async fn test_job_status_completed_without_results_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/job-3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "completed", "results": null})),
        )
        .mount(&mock_server)
        .await;

    let err = transport(&mock_server)
        .job_status("job-3")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_job_status_missing_status_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/job-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": null})))
        .mount(&mock_server)
        .await;

    let err = transport(&mock_server)
        .job_status("job-4")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
}

#[tokio::test]
async fn test_job_status_404_is_job_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Job not found"})))
        .mount(&mock_server)
        .await;

    let err = transport(&mock_server).job_status("gone").await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(id) if id == "gone"));
}

#[tokio::test]
async fn test_job_status_id_is_one_path_segment() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/batch%2F7%3Fx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let status = transport(&mock_server)
        .job_status("batch/7?x")
        .await
        .unwrap();
    assert_eq!(status.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_business_rule_rejections() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/validate"))
        .respond_with(
            ResponseTemplate::new(402).set_body_json(json!({"detail": "Insufficient credits"})),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/validate/async"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"detail": "Daily limit reached"})),
        )
        .mount(&mock_server)
        .await;

    let t = transport(&mock_server);

    let err = t.validate(&request(&["A"])).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientCredits(ref m) if m == "Insufficient credits"));
    assert!(!err.is_retryable());

    let err = t.submit(&request(&["A"])).await.unwrap_err();
    assert!(matches!(err, Error::DailyLimit(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/jobs/job-5"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let err = transport(&mock_server)
        .job_status("job-5")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_upgrade_event_sends_token_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upgrade-event"))
        .and(header("X-User-Token", "user-token-1"))
        .and(body_json(json!({"job_id": "job-9", "event": "success"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    transport(&mock_server)
        .report_upgrade("user-token-1", &UpgradeEvent::success("job-9"))
        .await
        .expect("Upgrade event should be accepted");
}
