pub mod api;
pub mod api_stripe;
pub mod api_tasks;
pub mod api_wallet;
pub mod auth;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod node;

pub use api::{router, AppState};
pub use auth::{AuthConfig, AuthUser};
pub use config::NodeConfig;
pub use metrics::Metrics;
pub use node::UserTestNode;
