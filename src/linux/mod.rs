pub mod backend;
pub mod boot;
pub mod compiler;
pub mod env;
pub mod forward;
pub mod input;
pub mod persist;
pub mod policy;
pub mod setup;
pub mod store;
pub mod validate;

#[cfg(test)]
pub mod test_helpers;
