pub mod provider;
pub mod sandbox;
pub mod store;
