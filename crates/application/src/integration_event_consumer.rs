use std::sync::Arc;

use permita_core::AppResult;
use tracing::{info, warn};

use crate::{HandleIntegrationEvent, IntegrationEventSource, Pipeline, RequestContext};

/// Feeds inbound authority events through the integration event pipeline.
pub struct IntegrationEventConsumer {
    source: Arc<dyn IntegrationEventSource>,
    pipeline: Pipeline<HandleIntegrationEvent>,
}

impl IntegrationEventConsumer {
    /// Creates a consumer over a source and a composed pipeline.
    #[must_use]
    pub fn new(
        source: Arc<dyn IntegrationEventSource>,
        pipeline: Pipeline<HandleIntegrationEvent>,
    ) -> Self {
        Self { source, pipeline }
    }

    /// Handles one batch and returns how many deliveries it contained.
    ///
    /// Only successfully handled deliveries are acknowledged; failed ones stay pending.
    pub async fn consume_batch(&self) -> AppResult<usize> {
        let deliveries = self.source.receive().await?;
        let received = deliveries.len();

        for delivery in deliveries {
            let correlation_id = delivery
                .correlation_id
                .unwrap_or_else(|| delivery.delivery_id.clone());
            let event = delivery.event.name();
            let mut context = RequestContext::system(correlation_id.as_str());

            match self
                .pipeline
                .send(
                    &mut context,
                    HandleIntegrationEvent {
                        event: delivery.event,
                    },
                )
                .await
            {
                Ok(outcome) => {
                    self.source.acknowledge(delivery.delivery_id.as_str()).await?;
                    info!(
                        event,
                        correlation_id = %correlation_id,
                        synced = outcome.summary.is_some(),
                        "integration event handled"
                    );
                }
                Err(error) => warn!(
                    event,
                    correlation_id = %correlation_id,
                    delivery_id = delivery.delivery_id.as_str(),
                    error = %error,
                    "integration event left pending"
                ),
            }
        }

        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use permita_core::{AppError, AppResult};
    use permita_domain::IntegrationEvent;
    use tokio::sync::Mutex;

    use crate::test_fakes::{FakeIntegrationEventSource, tenant};
    use crate::{
        ActivityHandler, HandleIntegrationEvent, InboundEvent, IntegrationEventOutcome, Pipeline,
        RequestContext,
    };

    use super::IntegrationEventConsumer;

    /// Fails for one user and records the correlation id of every call.
    #[derive(Default)]
    struct RecordingHandler {
        correlation_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActivityHandler<HandleIntegrationEvent> for RecordingHandler {
        async fn handle(
            &self,
            context: &RequestContext,
            activity: HandleIntegrationEvent,
        ) -> AppResult<IntegrationEventOutcome> {
            self.correlation_ids
                .lock()
                .await
                .push(context.correlation_id().to_owned());
            if matches!(
                &activity.event,
                IntegrationEvent::ActivityGroupGrantRevoked { user_id, .. } if user_id == "mallory"
            ) {
                return Err(AppError::Internal("authority unreachable".to_owned()));
            }
            Ok(IntegrationEventOutcome {
                event: activity.event.name(),
                summary: None,
            })
        }
    }

    fn revoked(delivery_id: &str, user_id: &str, correlation_id: Option<&str>) -> InboundEvent {
        InboundEvent {
            delivery_id: delivery_id.to_owned(),
            correlation_id: correlation_id.map(str::to_owned),
            event: IntegrationEvent::ActivityGroupGrantRevoked {
                tenant_id: tenant("T1"),
                user_id: user_id.to_owned(),
                activity_group_name: "G1".to_owned(),
            },
        }
    }

    fn consumer(
        source: Arc<FakeIntegrationEventSource>,
        handler: Arc<RecordingHandler>,
    ) -> IntegrationEventConsumer {
        let Ok(pipeline) = Pipeline::<HandleIntegrationEvent>::new(Vec::new(), handler) else {
            panic!("pipeline should compose");
        };
        IntegrationEventConsumer::new(source, pipeline)
    }

    #[tokio::test]
    async fn handled_deliveries_are_acknowledged_and_failures_stay_pending() {
        let source = Arc::new(FakeIntegrationEventSource::with_events(vec![
            revoked("1-0", "alice", Some("corr-authority")),
            revoked("2-0", "mallory", None),
        ]));
        let handler = Arc::new(RecordingHandler::default());
        let consumer = consumer(source.clone(), handler.clone());

        let received = consumer.consume_batch().await;

        assert!(received.is_ok_and(|count| count == 2));
        assert_eq!(
            source.acknowledged.lock().await.as_slice(),
            ["1-0".to_owned()]
        );
        assert_eq!(
            handler.correlation_ids.lock().await.as_slice(),
            ["corr-authority".to_owned(), "2-0".to_owned()]
        );
    }

    #[tokio::test]
    async fn empty_source_reports_nothing_received() {
        let source = Arc::new(FakeIntegrationEventSource::default());
        let consumer = consumer(source.clone(), Arc::new(RecordingHandler::default()));

        assert!(consumer.consume_batch().await.is_ok_and(|count| count == 0));
        assert!(source.acknowledged.lock().await.is_empty());
    }
}
