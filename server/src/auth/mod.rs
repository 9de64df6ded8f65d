pub mod admission;
pub mod geo;
pub mod jwt;
pub mod middleware;
pub mod secret_key;
