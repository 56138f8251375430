pub mod batch;
pub mod dispatch;
pub mod launcher;

pub use launcher::Launcher;
