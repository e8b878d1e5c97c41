//! Shared application state handed to the transport layer

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::casting::VoteCastingService;
use crate::config::ServiceConfig;
use crate::consistency::ConsistencyChecker;
use crate::database::Database;
use crate::finalizer::TallyFinalizer;
use crate::ledger::LedgerClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub db: Database,
    pub casting: VoteCastingService,
    pub checker: ConsistencyChecker,
    pub finalizer: TallyFinalizer,
    pub audit: AuditLog,
    pub ledger: Arc<dyn LedgerClient>,
}
