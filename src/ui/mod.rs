//! Terminal front-end: a table of users with add, rename and delete flows.

mod app;
mod forms;
mod helpers;
mod terminal;

pub use app::App;
pub use terminal::run_app;
