//! Run configuration.
//!
//! Loaded from an optional TOML file into [`StressConfigInput`], overlaid with
//! command-line flags, then resolved against the start-up memory snapshot:
//!
//! ```toml
//! mode = "routes"        # or "memory"
//! histogram = true
//! wait = false
//! pages = 262144         # memory mode, default: total pages
//! veto_pages = 20000     # default: vm.v_free_target
//!
//! [routes]
//! xroutes = 100
//! yroutes = 100
//! zroutes = 100
//! gateway = "1.0.0.1"
//! fib = 0
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::load::LoadConfig;
use crate::telemetry::MemorySnapshot;

/// Largest value of any one octet range.
pub const MAX_RANGE: u32 = 254;

pub const DEFAULT_RANGE: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{axis} can't be larger than 254 ({value})")]
    RangeTooLarge { axis: char, value: u32 },
    #[error("invalid gateway address {0:?}")]
    Gateway(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Map and touch anonymous pages.
    Memory,
    /// Add and delete host routes.
    Routes,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StressConfigInput {
    pub mode: Option<Mode>,
    pub histogram: Option<bool>,
    pub wait: Option<bool>,
    pub pages: Option<u64>,
    pub veto_pages: Option<u64>,
    pub routes: RoutesConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutesConfigInput {
    pub xroutes: Option<u32>,
    pub yroutes: Option<u32>,
    pub zroutes: Option<u32>,
    pub gateway: Option<String>,
    pub fib: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressConfig {
    /// `None` when no mode was chosen; the binary prints usage.
    pub mode: Option<Mode>,
    pub histogram: bool,
    pub wait: bool,
    /// Pages to map in memory mode.
    pub pages: u64,
    pub load: LoadConfig,
}

impl StressConfig {
    pub fn veto_pages(&self) -> u64 {
        self.load.veto_pages
    }
}

impl StressConfigInput {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Fill defaults from `snapshot` and validate.
    pub fn resolve(self, snapshot: &MemorySnapshot) -> Result<StressConfig, ConfigError> {
        let range = |axis, value: Option<u32>| {
            let value = value.unwrap_or(DEFAULT_RANGE);
            u8::try_from(value)
                .ok()
                .filter(|v| u32::from(*v) <= MAX_RANGE)
                .ok_or(ConfigError::RangeTooLarge { axis, value })
        };

        let gateway = match self.routes.gateway {
            Some(text) => text
                .trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| ConfigError::Gateway(text.clone()))?,
            None => LoadConfig::default().gateway,
        };

        let veto_pages = match (self.veto_pages, snapshot.free_target) {
            (Some(pages), _) => pages,
            (None, Some(target)) => target,
            (None, None) => {
                tracing::warn!("no free page target on this platform; vetoes disabled");
                0
            }
        };

        Ok(StressConfig {
            mode: self.mode,
            histogram: self.histogram.unwrap_or(false),
            wait: self.wait.unwrap_or(false),
            pages: self.pages.unwrap_or(snapshot.page_count),
            load: LoadConfig {
                xroutes: range('x', self.routes.xroutes)?,
                yroutes: range('y', self.routes.yroutes)?,
                zroutes: range('z', self.routes.zroutes)?,
                veto_pages,
                gateway,
                fib: self.routes.fib.unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MemorySnapshot {
        MemorySnapshot {
            free_count: 1000,
            free_severe: Some(100),
            free_target: Some(400),
            page_count: 4000,
            page_size: 4096,
        }
    }

    #[test]
    fn empty_input_uses_defaults() {
        let cfg = StressConfigInput::default().resolve(&snapshot()).unwrap();
        assert_eq!(cfg.mode, None);
        assert!(!cfg.histogram);
        assert_eq!(cfg.pages, 4000);
        assert_eq!(cfg.veto_pages(), 400);
        assert_eq!(cfg.load.xroutes, 100);
        assert_eq!(cfg.load.yroutes, 100);
        assert_eq!(cfg.load.zroutes, 100);
        assert_eq!(cfg.load.gateway, Ipv4Addr::new(1, 0, 0, 1));
    }

    #[test]
    fn parses_toml() {
        let text = r#"
            mode = "routes"
            histogram = true
            veto_pages = 7

            [routes]
            xroutes = 5
            yroutes = 3
            zroutes = 1
            gateway = "192.0.2.1"
            fib = 2
        "#;
        let cfg = StressConfigInput::from_toml(text, Path::new("test.toml"))
            .unwrap()
            .resolve(&snapshot())
            .unwrap();
        assert_eq!(cfg.mode, Some(Mode::Routes));
        assert!(cfg.histogram);
        assert_eq!(cfg.veto_pages(), 7);
        assert_eq!(
            cfg.load,
            LoadConfig {
                xroutes: 5,
                yroutes: 3,
                zroutes: 1,
                veto_pages: 7,
                gateway: Ipv4Addr::new(192, 0, 2, 1),
                fib: 2,
            }
        );
    }

    #[test]
    fn range_limit() {
        let mut input = StressConfigInput::default();
        input.routes.xroutes = Some(254);
        assert_eq!(input.clone().resolve(&snapshot()).unwrap().load.xroutes, 254);

        input.routes.zroutes = Some(255);
        let err = input.resolve(&snapshot()).unwrap_err();
        assert!(matches!(err, ConfigError::RangeTooLarge { axis: 'z', value: 255 }));
        assert_eq!(err.to_string(), "z can't be larger than 254 (255)");
    }

    #[test]
    fn missing_free_target_disables_veto() {
        let snap = MemorySnapshot {
            free_target: None,
            ..snapshot()
        };
        let cfg = StressConfigInput::default().resolve(&snap).unwrap();
        assert_eq!(cfg.veto_pages(), 0);
    }

    #[test]
    fn bad_gateway_and_bad_toml() {
        let mut input = StressConfigInput::default();
        input.routes.gateway = Some("1.0.0".into());
        assert!(matches!(input.resolve(&snapshot()), Err(ConfigError::Gateway(_))));

        let err = StressConfigInput::from_toml("mode = \"swap\"", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
