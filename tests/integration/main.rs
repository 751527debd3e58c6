//! Integration tests for the crawl worker
//!
//! These tests use wiremock for the root site and the in-memory queue and
//! dedup store in place of the shared infrastructure.

mod worker_tests;
