//! Domain models for perception and credential entities

mod account;
mod credential;
mod item;

pub use account::AccountId;
pub use credential::CredentialRecord;
pub use item::{ItemId, PerceivedItem};
