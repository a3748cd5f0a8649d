//! Credential models and the refresh collaborator contract.

pub mod credential;
pub mod refresh;
pub mod secret;

pub use credential::*;
pub use refresh::*;
pub use secret::*;
