//! Application services built on the cache layer.

pub mod commands;
pub mod error;
pub mod notices;
pub mod traffic;

pub use commands::{execute, parse_value};
pub use error::AppError;
pub use notices::{Notice, NoticeKind, NoticeStore};
pub use traffic::{NotFoundReport, TrafficStats};
