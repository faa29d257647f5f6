//! vtswitchd - repaints a DPMS-corrupted display on screen lock.
//!
//! Watches the session screensaver's `ActiveChanged` notifications over
//! `DBus`. When the screen locks while the monitor is already powered off,
//! the active virtual terminal is switched away and back to force a repaint,
//! and the monitor is powered off again. When the monitor is still on, a
//! single delayed recheck is scheduled from the session's idle threshold and
//! the current idle duration.

pub mod actuator;
pub mod config;
pub mod probe;
pub mod screensaver;
pub mod switcher;

pub use config::Config;
pub use switcher::Switcher;
