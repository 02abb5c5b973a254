//! Raw (wholesale) cost of a question run
//!
//! Raw cost is the run's own AI cost plus the cost of the most recent
//! evaluation of that run for the organization. Older re-evaluations are
//! superseded and never summed.

use rust_decimal::Decimal;
use runledger_shared::{EvaluationRecord, QuestionRun, QuestionType};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::EvaluationStore;

/// Breakdown of a run's wholesale cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawCost {
    pub run_cost: Decimal,
    pub evaluation_cost: Decimal,
    /// Evaluation that contributed `evaluation_cost`, if any
    pub evaluation_id: Option<Uuid>,
}

impl RawCost {
    pub fn total(&self) -> Decimal {
        self.run_cost + self.evaluation_cost
    }
}

#[derive(Clone)]
pub struct CostAggregator {
    evaluations: Arc<dyn EvaluationStore>,
}

impl CostAggregator {
    pub fn new(evaluations: Arc<dyn EvaluationStore>) -> Self {
        Self { evaluations }
    }

    pub async fn raw_cost(
        &self,
        run: &QuestionRun,
        org_id: Uuid,
        question_type: QuestionType,
    ) -> BillingResult<RawCost> {
        let evaluations = match question_type {
            QuestionType::Org => self.evaluations.get_org_evaluations(run.id, org_id).await?,
            QuestionType::Network => {
                self.evaluations
                    .get_network_evaluations(run.id, org_id)
                    .await?
            }
        };

        let latest = latest_evaluation(&evaluations);

        Ok(RawCost {
            run_cost: run.total_cost.unwrap_or(Decimal::ZERO),
            evaluation_cost: latest
                .and_then(|e| e.total_cost)
                .unwrap_or(Decimal::ZERO),
            evaluation_id: latest.map(|e| e.id),
        })
    }
}

/// Most recently created evaluation; on equal timestamps the last one wins
pub fn latest_evaluation(evaluations: &[EvaluationRecord]) -> Option<&EvaluationRecord> {
    evaluations.iter().max_by_key(|e| e.created_at)
}
