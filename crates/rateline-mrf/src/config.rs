//! Search configuration with optional TOML file defaults

use std::path::PathBuf;

use serde::Deserialize;

use crate::parse::ParseOptions;

/// Default number of concurrent file pipelines. MRFs are huge; a handful of
/// parallel downloads saturates most links.
pub const DEFAULT_WORKERS: usize = 3;

/// Runtime configuration for a search run.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Concurrent URL pipelines (worker pool bound).
    pub workers: usize,
    /// Always use the conservative inline gzip decoder.
    pub serial_gzip: bool,
    /// Skip in_network entirely when provider_references matched nothing.
    pub skip_unreferenced_in_network: bool,
    /// Override for in_network element workers (defaults to host parallelism).
    pub element_workers: Option<usize>,
    /// Scratch directory; accepted for interface compatibility, unused by
    /// the streaming pipeline.
    pub tmp_dir: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            serial_gzip: false,
            skip_unreferenced_in_network: false,
            element_workers: None,
            tmp_dir: None,
        }
    }
}

impl SearchConfig {
    pub fn parse_options(&self) -> ParseOptions {
        let defaults = ParseOptions::default();
        ParseOptions {
            skip_unreferenced_in_network: self.skip_unreferenced_in_network,
            element_workers: self.element_workers.unwrap_or(defaults.element_workers),
        }
    }
}

/// Optional defaults from `rateline.toml`. Every field is optional; CLI
/// flags override anything set here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileDefaults {
    pub workers: Option<usize>,
    pub serial_gzip: Option<bool>,
    pub skip_unreferenced_in_network: Option<bool>,
    pub element_workers: Option<usize>,
}

impl FileDefaults {
    /// Load from `./rateline.toml`, then the user config directory. Missing
    /// files yield empty defaults; an unreadable file is an error.
    pub fn load() -> Result<Self, String> {
        let local = PathBuf::from("rateline.toml");
        if local.exists() {
            return Self::from_file(&local);
        }
        if let Some(dirs) = directories::ProjectDirs::from("", "", "rateline") {
            let user = dirs.config_dir().join("config.toml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &std::path::Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("invalid {}: {e}", path.display()))
    }

    /// Fold file defaults under explicitly-set CLI values.
    pub fn apply(&self, config: &mut SearchConfig, workers_from_cli: bool) {
        if !workers_from_cli {
            if let Some(w) = self.workers {
                config.workers = w;
            }
        }
        if let Some(v) = self.serial_gzip {
            config.serial_gzip = config.serial_gzip || v;
        }
        if let Some(v) = self.skip_unreferenced_in_network {
            config.skip_unreferenced_in_network = config.skip_unreferenced_in_network || v;
        }
        if config.element_workers.is_none() {
            config.element_workers = self.element_workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_streaming_friendly() {
        let cfg = SearchConfig::default();
        assert_eq!(cfg.workers, 3);
        assert!(!cfg.serial_gzip);
        assert!(!cfg.skip_unreferenced_in_network);
    }

    #[test]
    fn file_defaults_parse() {
        let d: FileDefaults =
            toml::from_str("workers = 5\nskip_unreferenced_in_network = true").unwrap();
        assert_eq!(d.workers, Some(5));
        assert_eq!(d.skip_unreferenced_in_network, Some(true));
        assert_eq!(d.serial_gzip, None);
    }

    #[test]
    fn apply_respects_cli_precedence() {
        let d = FileDefaults {
            workers: Some(8),
            serial_gzip: Some(true),
            ..FileDefaults::default()
        };
        let mut cfg = SearchConfig {
            workers: 2,
            ..SearchConfig::default()
        };
        d.apply(&mut cfg, true);
        assert_eq!(cfg.workers, 2); // CLI set it explicitly
        assert!(cfg.serial_gzip);

        let mut cfg = SearchConfig::default();
        d.apply(&mut cfg, false);
        assert_eq!(cfg.workers, 8);
    }

    #[test]
    fn parse_options_carry_policy() {
        let cfg = SearchConfig {
            skip_unreferenced_in_network: true,
            element_workers: Some(2),
            ..SearchConfig::default()
        };
        let opts = cfg.parse_options();
        assert!(opts.skip_unreferenced_in_network);
        assert_eq!(opts.element_workers, 2);
    }
}
