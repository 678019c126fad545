//! Duration timers that exclude time spent suspended.

pub mod bank;

pub use bank::TimerBank;
