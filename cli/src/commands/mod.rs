pub mod discovery;
pub mod get;
pub mod validate;
