pub mod repository;
pub mod state_client;

pub use repository::*;
pub use state_client::*;
