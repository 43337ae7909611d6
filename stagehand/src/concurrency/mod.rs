/// Locking primitives used on short, contended critical sections
pub mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
