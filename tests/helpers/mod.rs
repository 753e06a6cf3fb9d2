#![allow(dead_code)]

pub mod pipeline;
pub mod test_postgres;

pub use mocks::*;
pub use pipeline::TestPipeline;
pub use test_postgres::TestPostgres;
