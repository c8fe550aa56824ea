pub mod api_gateway;
pub mod browser_session;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod oauth_client;
pub mod session;
pub mod ticktick_client;
