mod local_executor;

pub use local_executor::{LocalExecutor, ENV_JOB_DIR, ENV_JOB_INDEX, ENV_RESULT_PATH};
