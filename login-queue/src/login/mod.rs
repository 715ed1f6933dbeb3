//! Login event ingestion on top of the queue.

pub mod record;
pub mod service;

pub use record::LoginRecord;
pub use service::{IngestRoute, IngestStatus, LoginIngestService, LOGIN_QUEUE_NAME};
