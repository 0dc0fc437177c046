use crate::evaluation::EvaluationOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: EvaluationOrchestrator,
}
