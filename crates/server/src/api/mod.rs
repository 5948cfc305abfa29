pub mod bookings;
pub mod files;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod transactions;

pub use routes::create_router;
