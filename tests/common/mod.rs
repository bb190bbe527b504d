//! Shared helpers for the multi-rank integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use halogen::transport::mem::{MemSetup, MemTransport};
use halogen::transport::Rank;

/// Run `f` on `n` ranks, each a thread with its own setup and transport
/// endpoints, and collect the per-rank results in rank order.
pub fn run_world<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(Rank, MemSetup, MemTransport) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let setups = MemSetup::fabric(n);
    let transports = MemTransport::fabric(n);
    let handles: Vec<_> = setups
        .into_iter()
        .zip(transports)
        .enumerate()
        .map(|(rank, (setup, transport))| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(rank as Rank, setup, transport))
        })
        .collect();
    handles.into_iter().map(|h| h.join().expect("rank thread panicked")).collect()
}

/// Install the fmt subscriber once so `RUST_LOG` works in tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
