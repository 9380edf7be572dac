pub mod adapter;
pub mod btle;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod facade;
pub mod mock;
pub mod registry;
pub mod scan;
pub mod types;
