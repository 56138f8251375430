use launcher_core::config::Backend;
use launcher_core::executor::LaunchContext;
use launcher_core::Executor;

/// Create the executor for a backend.
pub fn create_executor(backend: Backend, context: LaunchContext) -> Box<dyn Executor> {
    match backend {
        Backend::Local => Box::new(launcher_local::LocalExecutor::new(context)),
        Backend::Slurm => Box::new(launcher_slurm::SlurmExecutor::new(context)),
    }
}
