use std::time::Duration;

use jiff::Timestamp;
use reqwest::blocking::{Client, Response};
use serde_json::{json, Value};

/// Body of the failure notification.
pub fn error_payload(
    function_name: &str,
    message: &str,
    stack_trace: &str,
    correlation_id: &str,
    timestamp: Timestamp,
) -> Value {
    json!({
        "status": "error",
        "functionName": function_name,
        "message": message,
        "timestamp": format!("{:.3}", timestamp),
        "details": {
            "stackTrace": stack_trace,
            "correlationId": correlation_id,
        },
    })
}

/// Post a failure notification to the alert webhook.  A correlation id is
/// generated when none is given.
pub fn send_error_notification(
    endpoint: &str,
    function_name: &str,
    message: &str,
    stack_trace: &str,
    correlation_id: Option<&str>,
) -> Result<Response, reqwest::Error> {
    let correlation_id = correlation_id
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let payload = error_payload(
        function_name,
        message,
        stack_trace,
        &correlation_id,
        Timestamp::now(),
    );

    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
    let response = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .body(payload.to_string())
        .send()?
        .error_for_status()?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::{env, error::Error};

    use super::*;

    #[test]
    fn payload_shape() -> Result<(), Box<dyn Error>> {
        let payload = error_payload(
            "weekly_ingest",
            "2 of 16 tenant/entity pairs failed",
            "[ABCD] loads: export failed",
            "abc-123",
            "2024-01-18T12:00:00Z".parse()?,
        );
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["functionName"], "weekly_ingest");
        assert_eq!(payload["timestamp"], "2024-01-18T12:00:00.000Z");
        assert_eq!(payload["details"]["correlationId"], "abc-123");
        assert_eq!(payload["details"]["stackTrace"], "[ABCD] loads: export failed");
        Ok(())
    }

    #[ignore]
    #[test]
    fn send_test_notification() -> Result<(), Box<dyn Error>> {
        crate::config::load_env_file("test")?;
        let res = send_error_notification(
            &env::var("ALVYS_ALERT_ENDPOINT")?,
            "alerts_test",
            "Test notification",
            "",
            None,
        )?;
        println!("{:?}", res);
        Ok(())
    }
}
