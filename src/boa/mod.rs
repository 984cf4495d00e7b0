/// Boa module contains the sandbox implementation backed by an embedded
/// JavaScript engine, so untrusted code never runs in a host-level
/// interpreter or touches the host process state.
pub mod sandbox;

pub use sandbox::BoaSandbox;
