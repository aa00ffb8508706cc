//! REST API: envelope responses, error mapping, handlers and router.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
