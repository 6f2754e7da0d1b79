use std::fmt;
use std::sync::Arc;

use vigil_core::persistence::ApiKeyStore;
use vigil_core::query::QueryService;
use vigil_core::submission::SubmissionService;

#[derive(Clone)]
pub struct AppState {
    pub submission: Arc<SubmissionService>,
    pub query: Arc<QueryService>,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
