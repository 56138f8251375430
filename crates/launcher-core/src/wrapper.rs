//! Builds the final argument vector for a job.
//!
//! Both the interpreter override and the container prefix are whitespace
//! separated templates; every token becomes its own argument and nothing is
//! ever joined back into a shell string.

use crate::config::QueueConfig;

/// Final command line for `base_command` under `config`.
///
/// The first token of `base_command` is replaced by the tokens of
/// `python_executable` when one is configured, and the tokens of
/// `container_exec_prefix` are placed in front of the result.
pub fn wrap(base_command: &[String], config: &QueueConfig) -> Vec<String> {
    let mut argv: Vec<String> = config
        .container_exec_prefix
        .as_deref()
        .map(tokens)
        .unwrap_or_default();

    match (&config.python_executable, base_command.split_first()) {
        (Some(python), Some((_, rest))) => {
            argv.extend(tokens(python));
            argv.extend(rest.iter().cloned());
        }
        _ => argv.extend(base_command.iter().cloned()),
    }
    argv
}

fn tokens(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unchanged_without_prefix_or_interpreter() {
        let base = argv(&["python", "train.py", "lr=0.1"]);
        assert_eq!(wrap(&base, &QueueConfig::default()), base);
    }

    #[test]
    fn interpreter_replaces_first_token_only() {
        let config = QueueConfig {
            python_executable: Some("/opt/conda/bin/python3".into()),
            ..QueueConfig::default()
        };
        let wrapped = wrap(&argv(&["python", "train.py"]), &config);
        assert_eq!(wrapped, argv(&["/opt/conda/bin/python3", "train.py"]));
    }

    #[test]
    fn multi_token_interpreter_keeps_boundaries() {
        let config = QueueConfig {
            python_executable: Some("apptainer exec /img/train.sif python".into()),
            ..QueueConfig::default()
        };
        let wrapped = wrap(&argv(&["python", "train.py"]), &config);
        assert_eq!(
            wrapped,
            argv(&["apptainer", "exec", "/img/train.sif", "python", "train.py"])
        );
    }

    #[test]
    fn prefix_tokens_lead_verbatim() {
        let config = QueueConfig {
            container_exec_prefix: Some("apptainer exec --nv /img/train.sif ".into()),
            ..QueueConfig::default()
        };
        let base = argv(&["python", "train.py", "name=with space"]);
        let wrapped = wrap(&base, &config);

        assert_eq!(&wrapped[..4], &argv(&["apptainer", "exec", "--nv", "/img/train.sif"])[..]);
        assert_eq!(&wrapped[4..], &base[..]);
        assert_eq!(wrapped.len(), 4 + base.len());
    }

    #[test]
    fn prefix_and_interpreter_compose() {
        let config = QueueConfig {
            container_exec_prefix: Some("apptainer exec img.sif".into()),
            python_executable: Some("python3".into()),
            ..QueueConfig::default()
        };
        let wrapped = wrap(&argv(&["python", "-u", "app.py"]), &config);
        assert_eq!(
            wrapped,
            argv(&["apptainer", "exec", "img.sif", "python3", "-u", "app.py"])
        );
    }

    #[test]
    fn empty_base_command_yields_prefix() {
        let config = QueueConfig {
            container_exec_prefix: Some("apptainer exec img.sif".into()),
            python_executable: Some("python3".into()),
            ..QueueConfig::default()
        };
        assert_eq!(wrap(&[], &config), argv(&["apptainer", "exec", "img.sif"]));
    }
}
