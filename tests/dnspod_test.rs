//! DNSPod gateway tests against a mocked API.

use certcrab::dns_provider::{DnsError, DnsProvider, DnspodClient};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> DnspodClient {
    DnspodClient::new(server.uri(), "1234", "secret", Duration::from_secs(5)).unwrap()
}

fn ok_body(record: serde_json::Value) -> serde_json::Value {
    json!({
        "status": {"code": "1", "message": "Action completed successful"},
        "record": record,
    })
}

mod create {
    use super::*;

    #[tokio::test]
    async fn test_string_record_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .and(body_string_contains("login_token=1234%2Csecret"))
            .and(body_string_contains("format=json"))
            .and(body_string_contains("domain=example.com"))
            .and(body_string_contains("sub_domain=_acme-challenge"))
            .and(body_string_contains("record_type=TXT"))
            .and(body_string_contains("ttl=600"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body(json!({"id": "16894439", "name": "_acme-challenge"}))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap();
        assert_eq!(id, "16894439");
    }

    #[tokio::test]
    async fn test_numeric_record_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({"id": 42}))))
            .mount(&server)
            .await;

        let id = client(&server)
            .add_txt_record("example.com", "_acme-challenge.www", "txt-value")
            .await
            .unwrap();
        assert_eq!(id, "42");
    }

    #[tokio::test]
    async fn test_business_failure_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "10004", "message": "Login failed"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap_err();
        match err {
            DnsError::Rejected { code, message } => {
                assert_eq!(code, "10004");
                assert_eq!(message, "Login failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_numeric_failure_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": 7, "message": "Domain not found"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Rejected { code, .. } if code == "7"));
    }

    #[tokio::test]
    async fn test_html_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>Bad Gateway</body></html>"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_record_id_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "1", "message": "ok"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Create"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = client(&server)
            .add_txt_record("example.com", "_acme-challenge", "txt-value")
            .await
            .unwrap_err();
        match err {
            DnsError::HttpStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn test_delete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Remove"))
            .and(body_string_contains("domain=example.com"))
            .and(body_string_contains("record_id=16894439"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "1", "message": "Action completed successful"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .delete_txt_record("example.com", "16894439")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_record_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.Remove"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "8", "message": "Record id invalid"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_txt_record("example.com", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Rejected { .. }));
    }
}

mod sweep {
    use super::*;

    fn listed(records: serde_json::Value) -> serde_json::Value {
        json!({
            "status": {"code": "1", "message": "Action completed successful"},
            "records": records,
        })
    }

    fn removed() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": {"code": "1", "message": "Action completed successful"}
        }))
    }

    #[tokio::test]
    async fn test_list_keeps_only_matching_txt_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.List"))
            .and(body_string_contains("domain=example.com"))
            .and(body_string_contains("sub_domain=_acme-challenge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listed(json!([
                {"id": "11", "name": "_acme-challenge", "type": "TXT", "value": "a"},
                {"id": 12, "name": "_acme-challenge", "type": "TXT", "value": "b"},
                {"id": "13", "name": "_acme-challenge", "type": "CNAME", "value": "c"},
                {"id": "14", "name": "_acme-challenge.www", "type": "TXT", "value": "d"},
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server)
            .list_txt_records("example.com", "_acme-challenge")
            .await
            .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["11", "12"]);
        assert_eq!(records[1].value, "b");
    }

    #[tokio::test]
    async fn test_delete_by_name_removes_every_match() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.List"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listed(json!([
                {"id": "11", "name": "_acme-challenge", "type": "TXT", "value": "a"},
                {"id": "12", "name": "_acme-challenge", "type": "TXT", "value": "b"},
            ]))))
            .mount(&server)
            .await;
        for id in ["11", "12"] {
            Mock::given(method("POST"))
                .and(path("/Record.Remove"))
                .and(body_string_contains(&format!("record_id={id}")))
                .respond_with(removed())
                .expect(1)
                .mount(&server)
                .await;
        }

        let count = client(&server)
            .delete_txt_records_by_name("example.com", "_acme-challenge")
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_no_records_code_is_an_empty_sweep() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.List"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "10", "message": "No records"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Record.Remove"))
            .respond_with(removed())
            .expect(0)
            .mount(&server)
            .await;

        let count = client(&server)
            .delete_txt_records_by_name("example.com", "_acme-challenge")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Record.List"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "-1", "message": "Login failed"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_txt_records_by_name("example.com", "_acme-challenge")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Rejected { code, .. } if code == "-1"));
    }

    #[tokio::test]
    async fn test_list_domains() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Domain.List"))
            .and(body_string_contains("login_token=1234%2Csecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"code": "1", "message": "Action completed successful"},
                "domains": [
                    {"id": 1, "name": "example.com"},
                    {"id": 2, "name": "example.org"},
                ],
            })))
            .mount(&server)
            .await;

        let domains = client(&server).list_domains().await.unwrap();
        assert_eq!(domains, ["example.com", "example.org"]);
    }
}
