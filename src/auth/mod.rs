//! Privilege checks used during authentication.
//!
//! The core abstraction is the [`Privilege`] trait, which lets different
//! privilege stores be plugged into the authentication task.
//!
//! - [`Privilege`] - user, schema and password checks
//! - [`StaticPrivilege`] - store built from the `users` configuration section
//!
//! # Security
//!
//! Stores never need the plaintext password: `mysql_native_password`
//! responses are verified against `SHA1(SHA1(password))`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ddal_gateway::auth::{Privilege, StaticPrivilege};
//!
//! let privilege: Arc<dyn Privilege> = Arc::new(
//!     StaticPrivilege::new().with_user("app", "secret", ["orders"])
//! );
//! ```

mod privilege;
mod static_privilege;

pub use privilege::Privilege;
pub use static_privilege::StaticPrivilege;
