//! Event and batch services.
//!
//! Each message from the service becomes a signed [`Event`](models::Event).
//! The [`BatchTracker`] collects event ids until a batch is due; the
//! [`BatchService`] then signs the rows as one [`Batch`](models::Batch).

pub mod batch;
pub mod event;
pub mod tracker;

pub use batch::BatchService;
pub use event::EventService;
pub use tracker::BatchTracker;
