//! Type definitions for Ordo.

mod ids;
mod status;
mod timestamps;

pub use ids::TxnId;
pub use status::TxnStatus;
pub use timestamps::Timestamp;
