//! Migration subsystems, leaves first.

pub mod inspect;
pub mod mapping;
pub mod migrate;
pub mod orchestrate;
pub mod rewrite;
