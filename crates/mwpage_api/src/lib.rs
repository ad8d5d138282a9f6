pub mod auth;
pub mod client;
pub mod error;
pub mod page;

pub use client::{ApiClient, ReqwestApiClient};
pub use error::PageError;
pub use page::{EditOptions, EditType, MoveOptions, Page};
