//! Store implementations.

pub mod deferral;
pub mod lock;

pub use deferral::PgDeferralStore;
pub use lock::PgLockStore;
