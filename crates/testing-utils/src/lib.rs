//! # Verifier Testing Utils
//!
//! 测试共用的数据构造器与外部协作方替身。
//!
//! ```toml
//! [dev-dependencies]
//! verifier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
