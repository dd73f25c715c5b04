mod env;
mod global_state;
mod middleware;
mod response;
mod routes;
mod utils;

pub use env::ApiServerEnv;
pub use global_state::GlobalState;
pub use middleware::{authenticate, ensure_account, require_admin, AuthenticatedRequest};
pub use response::{AppError, AppSuccess};
pub use routes::{cart_routes, checkout_routes, order_routes, payment_routes, refund_routes};
pub use utils::setup_tracing;
