//! Feature Overlay: a transactional query overlay for feature stores.
//!
//! A [`Session`] stages additions, removals and attribute updates against a
//! [`Store`] without mutating it. Reads through the session (iteration,
//! counting, sorting, paging, retyping and reprojection) see the staged
//! changes merged with the store's contents, built from the composable
//! readers in [`reader`].

pub mod config;
pub mod error;
pub mod models;
pub mod reader;
pub mod session;
pub mod store;
pub mod transform;

pub use config::OverlayConfig;
pub use error::{Error, Result};
pub use reader::{BoxedReader, FeatureReader, FeatureWriter};
pub use session::{CommitSummary, Delta, Session, SessionMode};
pub use store::{MemoryStore, SqliteStore, Store};
