pub mod auth;
pub mod error;
pub mod logging;
pub mod routes;
pub mod server;
pub mod state;
pub mod voice;
pub mod ws;

#[cfg(test)]
mod tests;

pub use server::HostServer;
pub use state::AppState;
