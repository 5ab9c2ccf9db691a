//! REST façade over the execution core.
//!
//! Wraps every response in the `{success, data|error, executed_at}`
//! envelope and maps classified core errors to REST status codes. The MCP
//! tool boundary is a separate external transport; this module is the
//! reference one.

mod envelope;
mod handlers;
mod routes;

pub use envelope::{ApiErrorResponse, ApiResponse};
pub use handlers::ApiState;
pub use routes::{api_routes, create_app};
