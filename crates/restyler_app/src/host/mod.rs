mod app;
mod logging;
mod persistence;
mod runner;

pub use app::run;
