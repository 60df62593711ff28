pub mod session;
pub mod store;

pub use session::VenueSession;
pub use store::{BookView, SnapshotStore};
