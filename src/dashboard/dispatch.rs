use std::sync::Arc;

use chrono::NaiveDate;

use super::channel::{Channel, REPORT_GENERATE_TOPIC, publish_json};
use super::models::GenerationRequest;
use crate::errors::ChannelError;

/// Publishes report generation requests on `e2e:report:generate`.
///
/// Fire-and-forget: nothing waits for the generator, and a failed publish is
/// returned to the caller without being retried.
#[derive(Clone)]
pub struct GenerationDispatcher {
    channel: Arc<dyn Channel>,
}

impl GenerationDispatcher {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    pub async fn publish_generation_request(
        &self,
        date: NaiveDate,
        request_id: Option<String>,
    ) -> Result<GenerationRequest, ChannelError> {
        let request = GenerationRequest {
            date: date.format("%Y-%m-%d").to_string(),
            request_id,
        };
        publish_json(self.channel.as_ref(), REPORT_GENERATE_TOPIC, &request).await?;
        tracing::info!(
            date = %request.date,
            request_id = request.request_id.as_deref().unwrap_or("-"),
            "Dispatched report generation request"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::channel::MemoryChannel;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_publishes_stable_wire_shape_without_request_id() {
        let channel = Arc::new(MemoryChannel::new());
        let dispatcher = GenerationDispatcher::new(channel.clone());

        dispatcher
            .publish_generation_request(date("2025-10-09"), None)
            .await
            .unwrap();

        let payloads = channel.payloads(REPORT_GENERATE_TOPIC);
        assert_eq!(payloads.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(json, serde_json::json!({"date": "2025-10-09", "requestId": null}));
    }

    #[tokio::test]
    async fn test_publishes_request_id_when_given() {
        let channel = Arc::new(MemoryChannel::new());
        let dispatcher = GenerationDispatcher::new(channel.clone());

        let req = dispatcher
            .publish_generation_request(date("2025-01-02"), Some("req-1".to_string()))
            .await
            .unwrap();

        assert_eq!(req.request_id.as_deref(), Some("req-1"));
        let json: serde_json::Value =
            serde_json::from_str(&channel.payloads(REPORT_GENERATE_TOPIC)[0]).unwrap();
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["date"], "2025-01-02");
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let channel = Arc::new(MemoryChannel::new());
        channel.fail_topic(REPORT_GENERATE_TOPIC);
        let dispatcher = GenerationDispatcher::new(channel.clone());

        let err = dispatcher
            .publish_generation_request(date("2025-10-09"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Transport { .. }));
    }
}
