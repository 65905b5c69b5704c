//! screenlockd - idle-activated screen-lock supervisor.
//!
//! Watches input idle time on an X session and drives a screensaver, a black
//! overlay window and a screen locker through the idle, blanked and locked
//! phases.

pub mod config;
pub mod controller;
pub mod idle;
pub mod notify;
pub mod overlay;
pub mod process;
pub mod screensaver;
pub mod supervisor;
