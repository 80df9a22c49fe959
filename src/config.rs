//! Service configuration and the request-level layout enums.
//!
//! All service-wide behaviour is controlled through [`ServiceConfig`], built
//! via its [`ServiceConfigBuilder`]. One struct holds every knob so it can
//! be shared across request handlers behind an `Arc`, logged at startup and
//! compared between deployments.

use crate::error::DocConvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service-wide configuration.
///
/// # Example
/// ```rust
/// use edgequake_docconv::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .scratch_root("/var/tmp/docconv")
///     .dpi(200)
///     .registry_ttl(Duration::from_secs(1800))
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of the scratch namespace. Default: `$TMPDIR/docconv`.
    ///
    /// Chunk sessions, assembled artifacts and rasteriser working
    /// directories all live below this directory.
    pub scratch_root: PathBuf,

    /// Maximum number of live registry entries. Default: 1024.
    ///
    /// The least recently used key is evicted when the registry is full.
    pub registry_capacity: usize,

    /// How long a registry key stays resolvable. Default: 1 h.
    pub registry_ttl: Duration,

    /// External rasteriser executable. Default: `pdftoppm`.
    pub rasterizer_program: String,

    /// Rasterisation resolution in dots per inch. Range: 72–600. Default: 150.
    pub dpi: u32,

    /// Upper bound on a single rasteriser run. Default: 120 s.
    pub process_timeout: Duration,

    /// Fallback delay after which a rasteriser working directory is removed
    /// even if its streaming response never finished. Default: 10 min.
    pub cleanup_retention: Duration,

    /// Interval between scratch sweeps. Default: 5 min.
    pub reaper_interval: Duration,

    /// Age after which scratch entries are swept. Default: 1 h.
    pub reaper_max_age: Duration,

    /// Maximum accepted HTTP request body. Default: 512 MiB.
    pub max_request_bytes: usize,

    /// Origins allowed to call the HTTP API from a browser. Default: none,
    /// which disables CORS handling. A single `*` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("docconv"),
            registry_capacity: 1024,
            registry_ttl: Duration::from_secs(60 * 60),
            rasterizer_program: "pdftoppm".to_string(),
            dpi: 150,
            process_timeout: Duration::from_secs(120),
            cleanup_retention: Duration::from_secs(10 * 60),
            reaper_interval: Duration::from_secs(5 * 60),
            reaper_max_age: Duration::from_secs(60 * 60),
            max_request_bytes: 512 * 1024 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = root.into();
        self
    }

    pub fn registry_capacity(mut self, n: usize) -> Self {
        self.config.registry_capacity = n;
        self
    }

    pub fn registry_ttl(mut self, ttl: Duration) -> Self {
        self.config.registry_ttl = ttl;
        self
    }

    pub fn rasterizer_program(mut self, program: impl Into<String>) -> Self {
        self.config.rasterizer_program = program.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.config.process_timeout = timeout;
        self
    }

    pub fn cleanup_retention(mut self, delay: Duration) -> Self {
        self.config.cleanup_retention = delay;
        self
    }

    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval = interval;
        self
    }

    pub fn reaper_max_age(mut self, age: Duration) -> Self {
        self.config.reaper_max_age = age;
        self
    }

    pub fn max_request_bytes(mut self, n: usize) -> Self {
        self.config.max_request_bytes = n;
        self
    }

    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.config.allowed_origins = origins;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, DocConvError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(DocConvError::Validation(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.registry_capacity == 0 {
            return Err(DocConvError::Validation(
                "Registry capacity must be ≥ 1".into(),
            ));
        }
        if c.rasterizer_program.trim().is_empty() {
            return Err(DocConvError::Validation(
                "Rasteriser program must not be empty".into(),
            ));
        }
        if c.process_timeout.is_zero() {
            return Err(DocConvError::Validation(
                "Process timeout must be greater than zero".into(),
            ));
        }
        if c.reaper_interval.is_zero() {
            return Err(DocConvError::Validation(
                "Reaper interval must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the page size of a composed PDF is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSizePolicy {
    /// Page matches the image plus margins; images are never scaled. (default)
    #[default]
    Auto,
    /// ISO A4, 595.28 × 841.89 pt.
    A4,
    /// US Letter, 612 × 792 pt.
    Letter,
}

impl PageSizePolicy {
    /// Portrait dimensions in points, or `None` for [`PageSizePolicy::Auto`].
    pub fn preset_points(self) -> Option<(f64, f64)> {
        match self {
            PageSizePolicy::Auto => None,
            PageSizePolicy::A4 => Some((595.28, 841.89)),
            PageSizePolicy::Letter => Some((612.0, 792.0)),
        }
    }
}

impl FromStr for PageSizePolicy {
    type Err = DocConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(PageSizePolicy::Auto),
            "a4" => Ok(PageSizePolicy::A4),
            "letter" => Ok(PageSizePolicy::Letter),
            other => Err(DocConvError::Validation(format!(
                "Unknown page size '{other}' (expected auto, a4 or letter)"
            ))),
        }
    }
}

impl fmt::Display for PageSizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageSizePolicy::Auto => "auto",
            PageSizePolicy::A4 => "a4",
            PageSizePolicy::Letter => "letter",
        };
        f.write_str(s)
    }
}

/// Page orientation for preset page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Height ≥ width. (default)
    #[default]
    Portrait,
    /// Width ≥ height.
    Landscape,
}

impl FromStr for Orientation {
    type Err = DocConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(DocConvError::Validation(format!(
                "Unknown orientation '{other}' (expected portrait or landscape)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = ServiceConfig::builder().build().unwrap();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.rasterizer_program, "pdftoppm");
        assert!(c.scratch_root.ends_with("docconv"));
    }

    #[test]
    fn dpi_out_of_range_rejected() {
        assert!(ServiceConfig::builder().dpi(50).build().is_err());
        assert!(ServiceConfig::builder().dpi(601).build().is_err());
        assert!(ServiceConfig::builder().dpi(600).build().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = ServiceConfig::builder()
            .registry_capacity(0)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn page_size_parsing() {
        assert_eq!("auto".parse::<PageSizePolicy>().unwrap(), PageSizePolicy::Auto);
        assert_eq!("A4".parse::<PageSizePolicy>().unwrap(), PageSizePolicy::A4);
        assert_eq!(" letter ".parse::<PageSizePolicy>().unwrap(), PageSizePolicy::Letter);
        assert_eq!("".parse::<PageSizePolicy>().unwrap(), PageSizePolicy::Auto);
        assert!("tabloid".parse::<PageSizePolicy>().is_err());
    }

    #[test]
    fn orientation_parsing() {
        assert_eq!("Landscape".parse::<Orientation>().unwrap(), Orientation::Landscape);
        assert_eq!("portrait".parse::<Orientation>().unwrap(), Orientation::Portrait);
        assert!("sideways".parse::<Orientation>().is_err());
    }
}
