use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use wb_common::{DeliveryResult, DispatchOutcome, FailureKind, Variables, WhatsAppAccount};

use crate::client::MessagingClient;
use crate::payload::TemplatePlan;

/// One send for one recipient. Built by the dispatcher, consumed by a worker.
pub struct DispatchTask {
    pub batch_id: Uuid,
    pub index: usize,
    pub recipient: String,
    pub variables: Variables,
    pub plan: Arc<TemplatePlan>,
    pub sender: Arc<WhatsAppAccount>,
}

impl DispatchTask {
    pub async fn execute(self, client: Arc<dyn MessagingClient>) -> DispatchOutcome {
        let result = match self.plan.render(&self.recipient, &self.variables) {
            Ok(payload) => client.send_template(&self.sender, &payload).await,
            Err(e) => DeliveryResult::failed(FailureKind::InvalidVariables, e.to_string()),
        };

        debug!(
            batch_id = %self.batch_id,
            index = self.index,
            recipient = %self.recipient,
            delivered = result.is_delivered(),
            "Dispatch task finished"
        );

        self.into_outcome(result)
    }

    pub fn into_outcome(self, result: DeliveryResult) -> DispatchOutcome {
        DispatchOutcome {
            batch_id: self.batch_id,
            index: self.index,
            recipient: self.recipient,
            result,
        }
    }
}
