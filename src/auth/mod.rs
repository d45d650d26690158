// Authentication module
// Manages the session token lifecycle, its persistence and periodic refresh

mod manager;
mod refresh;
mod scheduler;
pub mod store;
pub mod token;
mod types;

pub use manager::SessionManager;
pub use scheduler::ExpiryScheduler;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::AccessToken;
pub use types::{Registration, SessionSnapshot, UserProfile};

pub(crate) use refresh::error_message;
pub(crate) use types::{opt_string_or_number, string_or_number};
