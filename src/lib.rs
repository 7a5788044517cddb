//! Non-visual core of the WorkNest front-end: the session token lifecycle,
//! the authorized API client and the merge of mutation responses into
//! screen-owned lists.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::session::{RefreshOutcome, SessionEvent, SessionManager};
pub use application::session_controller::SessionController;
pub use domain::reconcile::{reconcile, remove, CachedEntity, TaskField};
pub use domain::token::{Claims, DecodeError, Token};
pub use infrastructure::config::{load_config, ClientConfig};
pub use infrastructure::error::{InfraError, RefreshError};
pub use infrastructure::telemetry::init_tracing;
