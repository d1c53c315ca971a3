//! The recognized configuration surface (§6). Parsing a config file is a
//! named non-goal — this is the struct an external loader would populate.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker thread count.
    pub thread: usize,
    /// Module search path, with a `?` placeholder for the module name.
    pub cservice_path: String,
    /// Initial service launch string, e.g. `"snlua bootstrap"`.
    pub bootstrap: String,
    /// PID file path; daemonizing is disabled if unset.
    pub daemon: Option<String>,
    /// Enable per-service CPU-time accounting.
    pub profile: bool,
    pub log_file: Option<String>,
    /// Name the builtin logger service binds to.
    pub log_service: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thread: 8,
            cservice_path: "./cservice/?.so".to_string(),
            bootstrap: "snlua bootstrap".to_string(),
            daemon: None,
            profile: true,
            log_file: None,
            log_service: "logger".to_string(),
        }
    }
}

impl Config {
    pub fn with_thread(mut self, n: usize) -> Self {
        self.thread = n;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = bootstrap.into();
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_options() {
        let cfg = Config::default();
        assert_eq!(cfg.thread, 8);
        assert_eq!(cfg.bootstrap, "snlua bootstrap");
        assert!(cfg.profile);
        assert_eq!(cfg.log_service, "logger");
        assert!(cfg.daemon.is_none());
    }

    #[test]
    fn builder_methods_override_defaults() {
        let cfg = Config::default().with_thread(4).with_profile(false);
        assert_eq!(cfg.thread, 4);
        assert!(!cfg.profile);
    }
}
