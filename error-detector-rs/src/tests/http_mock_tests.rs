//! Mock tests for the HTTP collaborators
//!
//! These tests use WireMock to stand in for the monitored API, its fallback
//! endpoint and the alert webhook.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::alerts::{AlertEvent, AlertKind, Notifier, WebhookNotifier};
    use crate::config::DetectorConfig;
    use crate::detector::ErrorDetector;
    use crate::recovery::{RecoveryOutcome, RecoveryRoute};
    use crate::retry::{HttpReplayer, RequestReplayer};
    use crate::sanitization::REDACTED;
    use crate::strategy::RecoveryStrategy;

    fn alert() -> AlertEvent {
        AlertEvent::new(
            AlertKind::CircuitBreakerOpened,
            "Circuit breaker opened after 5 failures",
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        )
        .with_details(json!({"failure_count": 5, "threshold": 5, "reset_timeout": 60}))
    }

    async fn request_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_webhook_posts_alert_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/alerts", server.uri()),
            "orders-api",
            Duration::from_secs(5),
        )
        .unwrap();
        notifier.notify(&alert()).await.unwrap();

        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["type"], "Circuit Breaker Opened");
        assert_eq!(bodies[0]["message"], "Circuit breaker opened after 5 failures");
        assert_eq!(bodies[0]["service"], "orders-api");
        assert_eq!(bodies[0]["timestamp"], "2024-05-01T10:00:00+00:00");
        assert_eq!(bodies[0]["details"]["failure_count"], 5);
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(server.uri(), "orders-api", Duration::from_secs(5)).unwrap();
        assert!(notifier.notify(&alert()).await.is_err());
    }

    #[tokio::test]
    async fn test_replayer_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(header("authorization", "Bearer test-api-key"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let url = format!("{}/v1/orders", server.uri());

        let with_key =
            HttpReplayer::new(Duration::from_secs(5), Some("test-api-key".to_string())).unwrap();
        assert_eq!(with_key.post(&url, &json!({"id": 1})).await.unwrap(), 201);

        // Without the header nothing matches and WireMock answers 404
        let without_key = HttpReplayer::new(Duration::from_secs(5), None).unwrap();
        assert_eq!(without_key.post(&url, &json!({"id": 1})).await.unwrap(), 404);

        let bodies = request_bodies(&server).await;
        assert_eq!(bodies[0], json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_detector_falls_back_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/backup/orders"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = DetectorConfig {
            log_file: None,
            request_timeout_secs: 5,
            ..DetectorConfig::default()
        };
        let detector = ErrorDetector::builder(config)
            .replayer(Arc::new(HttpReplayer::new(Duration::from_secs(5), None).unwrap()))
            .build()
            .unwrap();
        detector.add_recovery_strategy(
            500,
            RecoveryStrategy::fallback(format!("{}/backup/orders", server.uri())),
        ).unwrap();

        let outcome = detector
            .track_error(
                500,
                "boom",
                format!("{}/orders", server.uri()),
                Some(json!({"order": 42})),
                None,
            )
            .await;

        assert!(matches!(
            outcome,
            RecoveryOutcome::Recovered {
                route: RecoveryRoute::Fallback,
                ..
            }
        ));
        assert_eq!(request_bodies(&server).await, vec![json!({"order": 42})]);
    }

    #[tokio::test]
    async fn test_detector_notifies_webhook_with_sanitized_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/errors"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = DetectorConfig {
            log_file: None,
            service_name: "orders-api".to_string(),
            alert_webhook: Some(format!("{}/hooks/errors", server.uri())),
            ..DetectorConfig::default()
        };
        let detector = ErrorDetector::new(config).unwrap();
        detector.add_recovery_strategy(401, RecoveryStrategy::NotifyOnly).unwrap();

        let outcome = detector
            .track_error(
                401,
                "unauthorized",
                "/login",
                Some(json!({"user": "bob", "api_key": "sk-live-123"})),
                None,
            )
            .await;
        assert_eq!(outcome, RecoveryOutcome::Notified);

        let bodies = request_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["type"], "Error 401");
        assert_eq!(bodies[0]["service"], "orders-api");
        assert_eq!(bodies[0]["details"]["request_data"]["api_key"], REDACTED);
    }
}
