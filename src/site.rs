//! Monitored sites and their connectivity lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Uptime target used when a site does not configure one.
pub const DEFAULT_SLA_UPTIME: f64 = 99.9;

/// One of the two connectivity paths of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Primary,
    Secondary,
}

impl Line {
    pub fn as_str(&self) -> &'static str {
        match self {
            Line::Primary => "primary",
            Line::Secondary => "secondary",
        }
    }

    /// Capitalized form used in event messages.
    pub fn title(&self) -> &'static str {
        match self {
            Line::Primary => "Primary",
            Line::Secondary => "Secondary",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Line {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Line::Primary),
            "secondary" => Ok(Line::Secondary),
            other => Err(format!("unknown line: {}", other)),
        }
    }
}

/// Service level targets for one line (or the combined site).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    /// Uptime percentage, e.g. 99.9. Zero means unset.
    #[serde(default)]
    pub uptime: f64,
    /// Maximum acceptable mean latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<u32>,
    /// Restoration time in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restoration: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default)]
    pub primary: Sla,
    #[serde(default)]
    pub secondary: Sla,
    #[serde(default)]
    pub combined: Sla,
}

/// A monitoring target with one or two lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub primary_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_provider: Option<String>,
    /// Probe interval in seconds; zero falls back to the global default.
    #[serde(default)]
    pub interval: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sla: SlaConfig,
}

fn default_enabled() -> bool {
    true
}

impl Site {
    pub fn is_dual_line(&self) -> bool {
        self.secondary_ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }

    /// Address probed for the given line, if the site has that line.
    pub fn address(&self, line: Line) -> Option<&str> {
        match line {
            Line::Primary => Some(self.primary_ip.as_str()),
            Line::Secondary => self.secondary_ip.as_deref().filter(|ip| !ip.is_empty()),
        }
    }

    /// Lines this site actually has.
    pub fn lines(&self) -> Vec<Line> {
        if self.is_dual_line() {
            vec![Line::Primary, Line::Secondary]
        } else {
            vec![Line::Primary]
        }
    }

    pub fn probe_interval(&self, default: Duration) -> Duration {
        if self.interval == 0 {
            default
        } else {
            Duration::from_secs(self.interval)
        }
    }

    pub fn sla_uptime(&self, line: Line) -> f64 {
        let sla = match line {
            Line::Primary => &self.sla.primary,
            Line::Secondary => &self.sla.secondary,
        };
        if sla.uptime > 0.0 {
            sla.uptime
        } else {
            DEFAULT_SLA_UPTIME
        }
    }

    pub fn combined_sla_uptime(&self) -> f64 {
        if self.is_dual_line() && self.sla.combined.uptime > 0.0 {
            self.sla.combined.uptime
        } else {
            self.sla_uptime(Line::Primary)
        }
    }

    pub fn sla_max_latency(&self, line: Line) -> Option<u32> {
        match line {
            Line::Primary => self.sla.primary.max_latency,
            Line::Secondary => self.sla.secondary.max_latency,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_site(id: &str, secondary: Option<&str>) -> Site {
    Site {
        id: id.to_string(),
        name: format!("Site {}", id),
        location: "Lab".to_string(),
        primary_ip: "192.0.2.1".to_string(),
        secondary_ip: secondary.map(str::to_string),
        primary_provider: None,
        secondary_provider: None,
        interval: 30,
        enabled: true,
        sla: SlaConfig::default(),
    }
}
