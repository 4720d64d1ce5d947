//! Common test utilities.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ... test code
//! }
//! ```
//!
//! The allocator logs through `tracing`. Set `RUST_LOG` to see it, e.g.
//! `RUST_LOG=bufheap=trace cargo test --test allocation -- --nocapture`.

#![allow(dead_code)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Ensures tracing is only initialized once per test binary.
static INIT: Once = Once::new();

/// Install a console subscriber honouring `RUST_LOG` (default: `warn`).
///
/// Safe to call multiple times, only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Assert that no two of the given `(address, len)` ranges overlap.
pub fn assert_disjoint(ranges: &[(usize, usize)]) {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (first, len) = pair[0];
        let (second, _) = pair[1];
        assert!(
            first + len <= second,
            "allocation {first:#x}+{len} overlaps {second:#x}"
        );
    }
}
