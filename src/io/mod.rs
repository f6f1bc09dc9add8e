pub mod device_store;
pub mod notify;
pub mod weather;
