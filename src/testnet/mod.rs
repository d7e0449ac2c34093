//! Fixtures for exercising the ledger in tests. Compiled only for the
//! test configuration.

pub mod test_utils;
