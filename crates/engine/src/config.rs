use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Engine configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of per-target deploy scripts: `<scripts_dir>/<target>/<script>.sh`.
    pub scripts_dir: PathBuf,
    /// Root of Ansible playbooks.
    pub playbooks_dir: PathBuf,
    /// Root of the filesystem script catalog used by `dynamic_scripts`.
    pub dynamic_scripts_dir: PathBuf,
    /// Inventory file passed to the playbook runner with `-i`.
    pub inventory_path: PathBuf,
    /// Command that regenerates the inventory before a filtered stop.
    pub inventory_command: Vec<String>,
    /// Time limit for the inventory regeneration step only.
    pub inventory_timeout: Duration,
    /// Playbook runner binary.
    pub ansible_playbook_bin: String,
    /// Prefix for operator deep links in notifications.
    pub console_base_url: String,
    /// Command run after successful script jobs to sync outputs/credentials.
    pub sync_outputs_command: Option<Vec<String>>,
    /// Command run after server destroy/refresh to reconcile the inventory cache.
    pub reconcile_inventory_command: Option<Vec<String>>,
    /// Time limit for each hook command.
    pub hook_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./scripts"),
            playbooks_dir: PathBuf::from("./playbooks"),
            dynamic_scripts_dir: PathBuf::from("./scripts/dynamic"),
            inventory_path: PathBuf::from("./inventory/hosts.ini"),
            inventory_command: split_command("python3 ./scripts/generate_inventory.py"),
            inventory_timeout: Duration::from_secs(120),
            ansible_playbook_bin: "ansible-playbook".to_string(),
            console_base_url: "http://localhost:3000".to_string(),
            sync_outputs_command: None,
            reconcile_inventory_command: None,
            hook_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                                  |
    /// |-------------------------------|------------------------------------------|
    /// | `SCRIPTS_DIR`                 | `./scripts`                              |
    /// | `PLAYBOOKS_DIR`               | `./playbooks`                            |
    /// | `DYNAMIC_SCRIPTS_DIR`         | `./scripts/dynamic`                      |
    /// | `INVENTORY_PATH`              | `./inventory/hosts.ini`                  |
    /// | `INVENTORY_COMMAND`           | `python3 ./scripts/generate_inventory.py`|
    /// | `INVENTORY_TIMEOUT_SECS`      | `120`                                    |
    /// | `ANSIBLE_PLAYBOOK_BIN`        | `ansible-playbook`                       |
    /// | `CONSOLE_BASE_URL`            | `http://localhost:3000`                  |
    /// | `SYNC_OUTPUTS_COMMAND`        | unset                                    |
    /// | `RECONCILE_INVENTORY_COMMAND` | unset                                    |
    /// | `HOOK_TIMEOUT_SECS`           | `30`                                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let path = |var: &str, default: PathBuf| lookup(var).map(PathBuf::from).unwrap_or(default);
        let command = |var: &str| {
            lookup(var)
                .map(|v| split_command(&v))
                .filter(|argv| !argv.is_empty())
        };

        Ok(Self {
            scripts_dir: path("SCRIPTS_DIR", defaults.scripts_dir),
            playbooks_dir: path("PLAYBOOKS_DIR", defaults.playbooks_dir),
            dynamic_scripts_dir: path("DYNAMIC_SCRIPTS_DIR", defaults.dynamic_scripts_dir),
            inventory_path: path("INVENTORY_PATH", defaults.inventory_path),
            inventory_command: command("INVENTORY_COMMAND").unwrap_or(defaults.inventory_command),
            inventory_timeout: parse_secs(
                "INVENTORY_TIMEOUT_SECS",
                lookup("INVENTORY_TIMEOUT_SECS"),
                defaults.inventory_timeout,
            )?,
            ansible_playbook_bin: lookup("ANSIBLE_PLAYBOOK_BIN")
                .unwrap_or(defaults.ansible_playbook_bin),
            console_base_url: lookup("CONSOLE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.console_base_url),
            sync_outputs_command: command("SYNC_OUTPUTS_COMMAND"),
            reconcile_inventory_command: command("RECONCILE_INVENTORY_COMMAND"),
            hook_timeout: parse_secs(
                "HOOK_TIMEOUT_SECS",
                lookup("HOOK_TIMEOUT_SECS"),
                defaults.hook_timeout,
            )?,
        })
    }

    /// Path of a fixed per-target script.
    pub fn script_path(&self, target: &str, script: &str) -> PathBuf {
        self.scripts_dir.join(target).join(format!("{script}.sh"))
    }

    /// Path of a playbook.
    pub fn playbook_path(&self, playbook: &str) -> PathBuf {
        self.playbooks_dir.join(playbook)
    }

    /// Deep link to a job in the operator console.
    pub fn job_link(&self, job_id: &str) -> String {
        format!("{}/jobs/{job_id}", self.console_base_url)
    }
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_secs(
    var: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected: "u64",
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.scripts_dir, PathBuf::from("./scripts"));
        assert_eq!(config.inventory_timeout, Duration::from_secs(120));
        assert!(config.sync_outputs_command.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("SCRIPTS_DIR", "/srv/scripts"),
            ("INVENTORY_COMMAND", "  /usr/bin/gen-inventory --fast "),
            ("HOOK_TIMEOUT_SECS", "5"),
            ("CONSOLE_BASE_URL", "https://ops.example.com/"),
            ("SYNC_OUTPUTS_COMMAND", "/srv/bin/sync-outputs"),
        ]))
        .unwrap();

        assert_eq!(
            config.script_path("svc1", "deploy"),
            PathBuf::from("/srv/scripts/svc1/deploy.sh")
        );
        assert_eq!(config.inventory_command, vec!["/usr/bin/gen-inventory", "--fast"]);
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
        assert_eq!(config.job_link("ab12cd34"), "https://ops.example.com/jobs/ab12cd34");
        assert_eq!(
            config.sync_outputs_command,
            Some(vec!["/srv/bin/sync-outputs".to_string()])
        );
    }

    #[test]
    fn invalid_number_is_an_error() {
        let result = EngineConfig::from_lookup(lookup_from(&[("INVENTORY_TIMEOUT_SECS", "soon")]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid {
                var: "INVENTORY_TIMEOUT_SECS",
                ..
            })
        );
    }
}
