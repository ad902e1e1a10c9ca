pub mod handlers;
pub mod routes;

pub use handlers::{AppState, HealthResponse, StatusHandle};
pub use routes::create_router;
