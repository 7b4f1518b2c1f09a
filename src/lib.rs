//! Request dispatch core for Slack apps.
//!
//! [`SlackApp`] takes one inbound request (HTTP or Socket Mode), verifies and
//! parses it, resolves an identity, runs middleware, picks the first matching
//! listener and returns the listener's acknowledgement while any lazy work
//! continues in the background.

pub mod app;
pub mod assistant;
pub mod authorize;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod listener;
pub mod middleware;
pub mod payload;
pub mod request;
pub mod response;
pub mod server;
pub mod socket_mode;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{SlackApp, SlackAppBuilder};
pub use assistant::Assistant;
pub use config::AppConfig;
pub use context::{SlackContext, SlackRequest};
pub use error::DispatchError;
pub use listener::{ActionConstraint, Listener, OptionsConstraint, OptionsListener, Pattern};
pub use request::InboundRequest;
pub use response::{AckResponse, CompleteResponse};
