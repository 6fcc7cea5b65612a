#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

pub mod config;

pub mod counter;
pub use counter::AtomicCounter;

pub mod diagnostic;

pub mod lock;
pub use lock::Lock;

mod lock_api;
pub use crate::lock_api::{Mutex, MutexGuard};

pub mod rwlock;
pub use rwlock::RwLock;

pub mod semaphore;
pub use semaphore::Semaphore;

pub mod traced_counter;
pub use traced_counter::TracedCounter;

#[cfg(test)]
mod tests;
