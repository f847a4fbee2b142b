use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::CalendarStore;
use crate::services::sessions::SessionManager;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn CalendarStore>,
    pub sessions: Arc<SessionManager>,
}
