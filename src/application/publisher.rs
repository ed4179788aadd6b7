use crate::config::BusSettings;
use crate::domain::integration::{IntegrationEvent, IntegrationEventType};
use crate::domain::payment::Payment;
use crate::domain::ports::{ClockRef, EventBusRef};
use crate::error::Result;
use tracing::{error, info};

/// Hands integration events to the message bus.
///
/// Publication never fails the caller: the local record is already committed and
/// is the source of truth, so errors are only logged.
pub struct IntegrationEventPublisher {
    bus: EventBusRef,
    clock: ClockRef,
    settings: BusSettings,
}

impl IntegrationEventPublisher {
    pub fn new(bus: EventBusRef, clock: ClockRef, settings: BusSettings) -> Self {
        Self {
            bus,
            clock,
            settings,
        }
    }

    /// Publishes `payment.completed`, plus `appointment.confirmed` when the payment is for an appointment.
    pub async fn publish_payment_completed(&self, payment: &Payment) {
        self.publish(
            IntegrationEventType::PaymentCompleted,
            &self.settings.payment_exchange,
            &self.settings.payment_completed_key,
            payment,
        )
        .await;
        if payment.appointment_id.is_some() {
            self.publish(
                IntegrationEventType::AppointmentConfirmed,
                &self.settings.appointment_exchange,
                &self.settings.appointment_confirmed_key,
                payment,
            )
            .await;
        }
    }

    pub async fn publish_payment_refunded(&self, payment: &Payment) {
        self.publish(
            IntegrationEventType::PaymentRefunded,
            &self.settings.payment_exchange,
            &self.settings.payment_refunded_key,
            payment,
        )
        .await;
    }

    async fn publish(
        &self,
        event_type: IntegrationEventType,
        exchange: &str,
        routing_key: &str,
        payment: &Payment,
    ) {
        let event = IntegrationEvent::from_payment(event_type, payment, self.clock.now());
        match self.send(exchange, routing_key, &event).await {
            Ok(()) => {
                info!(payment_id = %payment.id, event_id = %event.event_id, routing_key, "integration event published")
            }
            Err(e) => {
                error!(payment_id = %payment.id, event_id = %event.event_id, routing_key, error = %e, "failed to publish integration event")
            }
        }
    }

    async fn send(&self, exchange: &str, routing_key: &str, event: &IntegrationEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.bus.publish(exchange, routing_key, &payload).await
    }
}
