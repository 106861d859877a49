//! # Agora Testkit
//!
//! Testing utilities for the Agora data layer.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Helper structs for setting up signed-entry scenarios
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust
//! use agora_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let entry = fixture.make_offer("btc-eur", 1, b"0.5 btc @ 61000");
//! entry.verify_signature().unwrap();
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use agora_testkit::generators::{entry_from_params, EntryParams};
//!
//! proptest! {
//!     #[test]
//!     fn content_hash_is_deterministic(params: EntryParams) {
//!         let a = entry_from_params(&params);
//!         let b = entry_from_params(&params);
//!         prop_assert_eq!(a.content_hash(), b.content_hash());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{multi_party_fixtures, now_millis, random_salt, TestFixture};
pub use generators::{entry_from_params, signed_entry, store_payload, EntryParams};
