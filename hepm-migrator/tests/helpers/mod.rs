//! Test Helper Utilities
//!
//! Shared utilities for testing hepm-migrator

#![allow(dead_code)]

pub mod db_utils;
pub mod fixtures;

pub use db_utils::{
    create_test_db, create_test_migrator, derived, literature, mirror_row, mirror_status, pid, record_for,
    test_config,
};
pub use fixtures::{standard_dump, write_dump, MarcBuilder, BASE_URL};
