pub mod script;
mod slurm_executor;

pub use slurm_executor::{SlurmCommands, SlurmExecutor};
