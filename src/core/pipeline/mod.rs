pub mod protocol;
pub mod verifying;
pub mod worker;
