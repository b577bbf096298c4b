//! # Trellis Core Kernel
//!
//! The `kernel` module holds the pieces every other subsystem leans on:
//!
//! - **Lifecycle**: the [`StateTracker`](lifecycle::StateTracker) finite state
//!   machine guarding `init`, `shutdown` and warm restarts of the manager.
//! - **Core Constants**: system-wide defaults via the `constants` submodule.
//! - **Error Handling**: the crate-wide [`Error`](error::Error) and its
//!   `Result` alias in the `error` submodule.
pub mod constants;
pub mod error;
pub mod lifecycle;

pub use error::{Error, Result};
pub use lifecycle::{ManagerState, StateTracker};
