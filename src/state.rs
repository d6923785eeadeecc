use std::sync::Arc;

use crate::{
    backend::RewriteBackend, cancel::CancelRegistry, engine::Pacing, metrics::AppMetrics,
    service::RephraseService,
};

#[derive(Clone)]
pub struct AppState {
    pub service: RephraseService,
    pub cancels: Arc<CancelRegistry>,
    pub metrics: Arc<AppMetrics>,
    pub pacing: Pacing,
}

impl AppState {
    pub fn new(backend: Arc<dyn RewriteBackend>) -> Self {
        Self {
            service: RephraseService::new(backend),
            cancels: Arc::new(CancelRegistry::default()),
            metrics: Arc::new(AppMetrics::new()),
            pacing: Pacing::from_env(),
        }
    }

    /// Like `new` but with pacing zeroed so streaming tests complete
    /// immediately.
    pub fn new_for_tests(backend: Arc<dyn RewriteBackend>) -> Self {
        Self {
            service: RephraseService::new(backend),
            cancels: Arc::new(CancelRegistry::default()),
            metrics: Arc::new(AppMetrics::new()),
            pacing: Pacing::zero(),
        }
    }
}
