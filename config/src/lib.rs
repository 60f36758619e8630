//! Runtime configuration for the mux core.
//!
//! This is deliberately small: the mux only consumes a handful of explicit
//! options (see the Pane/Window/Tab/Domain-spawn settings below). Values are
//! loaded once from an optional `mux.toml` in the user's config directory and
//! cached behind a generation-counted handle so that consumers can cheaply
//! detect a reload.
use anyhow::Context as _;
use portable_pty::CommandBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

mod position;
pub use position::GuiPosition;

/// Behavior when the program spawned for a pane terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitBehavior {
    /// Close the associated pane
    Close,
    /// Close the associated pane only if the process exited cleanly
    CloseOnCleanExit,
    /// Hold the pane open until it is explicitly closed
    Hold,
}

impl Default for ExitBehavior {
    fn default() -> Self {
        Self::Close
    }
}

/// How verbose the banner left behind by `ExitBehavior::Hold` /
/// `CloseOnCleanExit` should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitBehaviorMessaging {
    Verbose,
    Brief,
    Terse,
    None,
}

impl Default for ExitBehaviorMessaging {
    fn default() -> Self {
        Self::Verbose
    }
}

/// A direction (or tab-order relation) used to navigate between panes in a
/// split tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneDirection {
    Up,
    Down,
    Left,
    Right,
    Next,
    Prev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Behavior when the pane's process exits.
    pub exit_behavior: ExitBehavior,
    /// How much detail to put in the exit banner.
    pub exit_behavior_messaging: ExitBehaviorMessaging,
    /// Exit codes that are considered "clean". 0 is implicitly clean.
    pub clean_exit_codes: Vec<u32>,
    /// Foreground process names that never prompt for close confirmation.
    pub skip_close_confirmation_for_processes_named: Vec<String>,
    /// Log escape sequences we don't recognize, instead of silently eating them.
    pub log_unknown_escape_sequences: bool,

    /// When closing a tab, switch back to the tab that was last active
    /// rather than to the one immediately adjacent.
    pub switch_to_last_active_tab_when_closing_tab: bool,

    /// Auto-unzoom a tab's zoomed pane when a layout operation would
    /// otherwise be a silent no-op.
    pub unzoom_on_switch_pane: bool,

    /// Default program to run when a pane is spawned without one.
    pub default_prog: Option<Vec<String>>,
    /// Default working directory for spawned panes.
    pub default_cwd: Option<PathBuf>,

    /// Extra environment variables applied to every spawned pane, beyond
    /// the inherited environment and `TERM`/`WEZTERM_PANE`.
    pub set_environment_variables: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exit_behavior: ExitBehavior::default(),
            exit_behavior_messaging: ExitBehaviorMessaging::default(),
            clean_exit_codes: vec![0],
            skip_close_confirmation_for_processes_named: default_skip_close_names(),
            log_unknown_escape_sequences: false,
            switch_to_last_active_tab_when_closing_tab: false,
            unzoom_on_switch_pane: true,
            default_prog: None,
            default_cwd: None,
            set_environment_variables: HashMap::new(),
        }
    }
}

fn default_skip_close_names() -> Vec<String> {
    vec![
        "bash".to_string(),
        "zsh".to_string(),
        "fish".to_string(),
        "tmux".to_string(),
    ]
}

impl Config {
    pub fn default_config() -> Self {
        Self::default()
    }

    fn load_from_disk() -> anyhow::Result<Self> {
        let path = Self::config_file_path();
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn config_file_path() -> PathBuf {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mux")
            .join("mux.toml")
    }

    /// Returns true if `exit_code` should be treated as a clean exit.
    pub fn is_clean_exit_code(&self, exit_code: u32) -> bool {
        exit_code == 0 || self.clean_exit_codes.contains(&exit_code)
    }

    /// Builds the default command to run when a pane spawn request carries
    /// no explicit command: the configured `default_prog`, or a sensible
    /// platform shell.
    pub fn build_prog(
        &self,
        prog: Option<&Vec<String>>,
        default_cwd: Option<&PathBuf>,
    ) -> anyhow::Result<CommandBuilder> {
        let mut cmd = match prog.or(self.default_prog.as_ref()) {
            Some(argv) => {
                let mut cmd = CommandBuilder::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
            None => CommandBuilder::new_default_prog(),
        };
        self.apply_cmd_defaults(&mut cmd, default_cwd);
        Ok(cmd)
    }

    /// Applies configured defaults (cwd, extra env) to a command that the
    /// caller already mostly built.
    pub fn apply_cmd_defaults(&self, cmd: &mut CommandBuilder, default_cwd: Option<&PathBuf>) {
        if cmd.get_cwd().is_none() {
            if let Some(cwd) = default_cwd.or(self.default_cwd.as_ref()) {
                cmd.cwd(cwd);
            }
        }
        for (k, v) in &self.set_environment_variables {
            cmd.env(k, v);
        }
    }
}

struct ConfigInner {
    config: Arc<Config>,
    error: Option<String>,
    generation: usize,
}

impl ConfigInner {
    fn new() -> Self {
        Self {
            config: Arc::new(Config::default_config()),
            error: None,
            generation: 0,
        }
    }

    fn reload(&mut self) {
        match Config::load_from_disk() {
            Ok(config) => {
                self.config = Arc::new(config);
                self.error = None;
            }
            Err(err) => {
                // Missing config file is not an error worth surfacing; any
                // other failure (bad toml, ...) is kept for later reporting
                // but we keep running on the previous configuration.
                if self.error.is_none() {
                    log::debug!("not reloading configuration: {:#}", err);
                }
                self.error = Some(err.to_string());
            }
        }
        self.generation += 1;
    }
}

lazy_static::lazy_static! {
    static ref CONFIG: ConfigSingleton = ConfigSingleton::new();
}

struct ConfigSingleton {
    inner: Mutex<ConfigInner>,
}

impl ConfigSingleton {
    fn new() -> Self {
        let mut inner = ConfigInner::new();
        inner.reload();
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn get(&self) -> ConfigHandle {
        let inner = self.inner.lock().unwrap();
        ConfigHandle {
            config: Arc::clone(&inner.config),
            generation: inner.generation,
        }
    }

    fn use_defaults(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.config = Arc::new(Config::default_config());
        inner.error = None;
        inner.generation += 1;
    }

    fn use_this_config(&self, config: Config) {
        let mut inner = self.inner.lock().unwrap();
        inner.config = Arc::new(config);
        inner.error = None;
        inner.generation += 1;
    }

    fn reload(&self) {
        self.inner.lock().unwrap().reload();
    }

    fn get_error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }
}

/// Returns a handle to the current configuration.
pub fn configuration() -> ConfigHandle {
    CONFIG.get()
}

/// If there was an error loading the preferred configuration, return it,
/// otherwise return the current configuration.
pub fn configuration_result() -> anyhow::Result<ConfigHandle> {
    if let Some(error) = CONFIG.get_error() {
        anyhow::bail!("{}", error);
    }
    Ok(CONFIG.get())
}

/// Resets to a config that doesn't depend on the user's environment; used by tests.
pub fn use_test_configuration() {
    CONFIG.use_defaults();
}

pub fn use_this_configuration(config: Config) {
    CONFIG.use_this_config(config);
}

pub fn reload() {
    CONFIG.reload();
}

#[derive(Clone, Debug)]
pub struct ConfigHandle {
    config: Arc<Config>,
    generation: usize,
}

impl ConfigHandle {
    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl std::ops::Deref for ConfigHandle {
    type Target = Config;
    fn deref(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clean_exit_codes() {
        let config = Config::default_config();
        assert!(config.is_clean_exit_code(0));
        assert!(!config.is_clean_exit_code(1));
    }

    #[test]
    fn handle_survives_reload() {
        use_test_configuration();
        let before = configuration().generation();
        use_this_configuration(Config {
            unzoom_on_switch_pane: false,
            ..Config::default_config()
        });
        let after = configuration();
        assert!(after.generation() > before);
        assert!(!after.unzoom_on_switch_pane);
    }
}
