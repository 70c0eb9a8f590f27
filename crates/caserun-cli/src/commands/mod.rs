pub mod classify;
pub mod config;
pub mod emergency_stop;
pub mod run;
