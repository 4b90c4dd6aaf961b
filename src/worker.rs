// Parallel test worker identity
// One ordered key list yields the reuse-name token, the port-range id and
// the parallel-worker flag

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Read-only view of environment variables
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    /// Value of `key` when present and not blank
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|value| !value.trim().is_empty())
    }
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
}

impl StaticEnv {
    pub fn new(vars: &[(&str, &str)]) -> Self {
        Self {
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        self.vars.remove(key);
    }
}

impl EnvSource for StaticEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

fn token_sanitizer() -> &'static Regex {
    static SANITIZER: OnceLock<Regex> = OnceLock::new();
    SANITIZER.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static regex is valid"))
}

/// Make a raw token safe for use inside a container name
pub fn normalize_token(raw: &str) -> Option<String> {
    let normalized = token_sanitizer().replace_all(raw.trim(), "-").into_owned();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Resolves the token identifying the current parallel worker
pub struct WorkerTokenResolver<'a> {
    keys: &'a [String],
}

impl<'a> WorkerTokenResolver<'a> {
    pub fn new(keys: &'a [String]) -> Self {
        Self { keys }
    }

    /// First candidate variable whose normalized value is non-empty
    pub fn resolve(&self, env: &dyn EnvSource) -> Option<String> {
        self.keys
            .iter()
            .filter_map(|key| env.var(key))
            .find_map(|value| normalize_token(&value))
    }
}

/// Numeric worker id for port ranges, taken from the same token as reuse
/// names. Negative and non-numeric tokens become 0.
pub fn worker_id(keys: &[String], env: &dyn EnvSource) -> u16 {
    WorkerTokenResolver::new(keys)
        .resolve(env)
        .and_then(|token| token.parse::<i64>().ok())
        .map(|id| id.clamp(0, u16::MAX as i64) as u16)
        .unwrap_or(0)
}

/// A process is a parallel worker when its worker token is a plain number
pub fn is_parallel_worker_process(keys: &[String], env: &dyn EnvSource) -> bool {
    WorkerTokenResolver::new(keys)
        .resolve(env)
        .map(|token| token.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
