//! A backend aggregator for the Gatekeeper viewer.
//!
//! Fetches workflow runs and their analysis artifacts from GitHub, inspects Copilot CLI sessions,
//! and relays context-aware questions to a hosted agent.

pub mod agent;
pub mod env;
pub mod error;
pub mod redact;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod workflow;

pub use error::{Error, ErrorKind};

/// A shorthand to define statically allocated variables using a [`std::sync::LazyLock`].
///
/// # Examples
///
/// ```rust
/// # use gatekeeper_viewer::static_lazy_lock;
/// # use std::sync::LazyLock;
/// static_lazy_lock! {
///     pub VAR_1: String = String::from("a static variable");
/// }
/// // ...equals to...
/// pub static VAR_2: LazyLock<String> = LazyLock::new(|| String::from("a static variable"));
/// ```
#[macro_export]
macro_rules! static_lazy_lock {
    ($($(#[$meta:meta])* $vis:vis $name:ident: $type:ty = $expr:expr;)+) => {
        $(
            $(#[$meta])*
            $vis static $name: $crate::__priv_macro_use::LazyLock<$type> =
                $crate::__priv_macro_use::LazyLock::new(|| $expr);
        )+
    };
}

#[doc(hidden)]
pub mod __priv_macro_use {
    pub use std::sync::LazyLock;
}
