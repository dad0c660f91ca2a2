#![forbid(unsafe_code)]

//! `xctest-driver` drives XCUITest runs on a device over the test
//! manager daemon's multiplexed RPC protocol.

pub mod conditions;
pub mod config;
pub mod device;
pub mod errors;
pub mod logging;
pub mod models;
pub mod process;
pub mod rpc;
pub mod testmanager;

pub use config::DriverConfig;
pub use errors::{AppError, Result};
pub use testmanager::ide_interface::TestListener;
pub use testmanager::orchestrator::TestSessionDriver;
