pub mod cache;
pub mod policy;
