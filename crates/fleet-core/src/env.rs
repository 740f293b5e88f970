// ABOUTME: Derives the environment overrides applied to a worker process.
// ABOUTME: Sets identity and launch params, and lists parent secrets the worker must not inherit.

use crate::config::WorkerConfig;
use crate::spec::LaunchSpec;

/// Environment changes applied on top of the supervisor's own environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerEnv {
    /// Variables to set, in application order.
    pub set: Vec<(String, String)>,
    /// Variables to remove from the inherited environment.
    pub remove: Vec<String>,
}

impl WorkerEnv {
    /// Build the overrides for one worker.
    ///
    /// Cleared variables win over params that happen to map to the same name:
    /// a secret listed in `clear_env` never reaches the worker.
    pub fn for_spec(spec: &LaunchSpec, worker: &WorkerConfig) -> Self {
        let mut set = vec![(
            worker.identity_var.clone(),
            spec.identity.as_str().to_string(),
        )];

        for (key, value) in &spec.params {
            let name = env_var_name(&worker.param_prefix, key);
            if name == worker.identity_var {
                tracing::warn!(
                    identity = %spec.identity,
                    param = %key,
                    "Launch param shadows the identity variable, ignoring"
                );
                continue;
            }
            if is_reserved_name(&name) {
                tracing::warn!(
                    identity = %spec.identity,
                    param = %key,
                    env = %name,
                    "Launch param maps to a reserved variable, ignoring"
                );
                continue;
            }
            set.push((name, value.clone()));
        }

        let remove: Vec<String> = worker
            .clear_env
            .iter()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect();
        set.retain(|(name, _)| !remove.contains(name));

        Self { set, remove }
    }

    /// Value this env would set for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.set
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Variables a launch param may never set.
const RESERVED_NAMES: &[&str] = &["PATH", "HOME", "USER", "SHELL", "IFS", "ENV", "BASH_ENV"];
const RESERVED_PREFIXES: &[&str] = &["LD_", "DYLD_"];

/// True for names that would change how the worker is loaded or resolved,
/// and for names with no letters or digits at all.
pub fn is_reserved_name(name: &str) -> bool {
    !name.chars().any(|c| c.is_ascii_alphanumeric())
        || RESERVED_NAMES.contains(&name)
        || RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Convert a param key (`client_id`, `clientId`, `client-id`) into an
/// environment variable name (`CLIENT_ID`) with the given prefix.
pub fn env_var_name(prefix: &str, key: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + key.len() + 4);
    name.push_str(prefix);

    let mut prev_lower = false;
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower {
                name.push('_');
            }
            name.push(ch.to_ascii_uppercase());
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        } else {
            if !name.ends_with('_') {
                name.push('_');
            }
            prev_lower = false;
        }
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::WorkerIdentity;

    fn worker() -> WorkerConfig {
        WorkerConfig::new("worker")
    }

    fn spec(id: &str) -> LaunchSpec {
        LaunchSpec::new(WorkerIdentity::new(id).unwrap())
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("", "client_id"), "CLIENT_ID");
        assert_eq!(env_var_name("", "clientId"), "CLIENT_ID");
        assert_eq!(env_var_name("", "client-id"), "CLIENT_ID");
        assert_eq!(env_var_name("AGENT_", "guild"), "AGENT_GUILD");
        assert_eq!(env_var_name("", "v2Endpoint"), "V2_ENDPOINT");
    }

    #[test]
    fn test_identity_and_params_are_set() {
        let spec = spec("agent-7").with_param("client_id", "1234");
        let env = WorkerEnv::for_spec(&spec, &worker());

        assert_eq!(env.get("AGENT_ID"), Some("agent-7"));
        assert_eq!(env.get("CLIENT_ID"), Some("1234"));
        assert_eq!(env.set[0].0, "AGENT_ID");
    }

    #[test]
    fn test_secret_is_cleared() {
        let env = WorkerEnv::for_spec(&spec("a"), &worker());
        assert_eq!(env.remove, vec!["BOT_TOKEN".to_string()]);
        assert_eq!(env.get("BOT_TOKEN"), None);
    }

    #[test]
    fn test_param_cannot_reintroduce_cleared_secret() {
        let spec = spec("a").with_param("bot_token", "stale");
        let env = WorkerEnv::for_spec(&spec, &worker());
        assert_eq!(env.get("BOT_TOKEN"), None);
        assert!(env.remove.contains(&"BOT_TOKEN".to_string()));
    }

    #[test]
    fn test_param_cannot_override_identity() {
        let spec = spec("real").with_param("agent_id", "spoofed");
        let env = WorkerEnv::for_spec(&spec, &worker());
        assert_eq!(env.get("AGENT_ID"), Some("real"));
        assert_eq!(env.set.len(), 1);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_name("PATH"));
        assert!(is_reserved_name("LD_PRELOAD"));
        assert!(is_reserved_name("DYLD_INSERT_LIBRARIES"));
        assert!(is_reserved_name("_"));
        assert!(is_reserved_name(""));
        assert!(!is_reserved_name("CLIENT_ID"));
        assert!(!is_reserved_name("PATH_PREFIX"));
    }

    #[test]
    fn test_params_cannot_set_loader_or_path_variables() {
        let spec = spec("a")
            .with_param("path", "/evil")
            .with_param("ld_preload", "/tmp/x.so")
            .with_param("--", "v")
            .with_param("home", "/tmp")
            .with_param("client_id", "1");
        let env = WorkerEnv::for_spec(&spec, &worker());

        let names: Vec<&str> = env.set.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["AGENT_ID", "CLIENT_ID"]);
    }

    #[test]
    fn test_prefixed_params_are_not_reserved() {
        let mut worker = worker();
        worker.param_prefix = "FLEET_".to_string();
        let spec = spec("a").with_param("path", "/srv/data");
        let env = WorkerEnv::for_spec(&spec, &worker);
        assert_eq!(env.get("FLEET_PATH"), Some("/srv/data"));
        assert_eq!(env.get("PATH"), None);
    }

    #[test]
    fn test_param_prefix() {
        let mut worker = worker();
        worker.param_prefix = "FLEET_".to_string();
        let spec = spec("a").with_param("client_id", "9");
        let env = WorkerEnv::for_spec(&spec, &worker);
        assert_eq!(env.get("FLEET_CLIENT_ID"), Some("9"));
        assert_eq!(env.get("CLIENT_ID"), None);
    }
}
