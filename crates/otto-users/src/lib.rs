//! Users, bearer tokens and push-button authentication.

mod push_button;
mod store;

pub use push_button::{PushButtonFailure, PushButtonManager, PushButtonTransaction};
pub use store::{
    validate_password, validate_token, validate_username, TokenInfo, UserError, UserManager,
};
