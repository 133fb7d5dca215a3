//! # Middleware
//!
//! Chain handlers that run around the conversation engine:
//!
//! - [`LoggingHandler`] – logs every inbound event and the chain's final response
//! - [`RegistryHandler`] – registers users on first contact, promotes configured super-admins,
//!   blocks deactivated users

mod logging;
mod registry;

pub use logging::LoggingHandler;
pub use registry::RegistryHandler;

#[cfg(test)]
mod test;
