//! Fleet application staleness
//!
//! Installations are grouped by a normalized application name. Within a
//! group the latest version is the highest one observed anywhere in the
//! fleet; every installation ordered below it is outdated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::InventoryConfig;
use crate::version::{VersionKey, tokenize};

/// Trailing installer or bundle extension. Dotted product names such as
/// `Microsoft.Teams` or `Node.js` keep their suffix.
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(app|pkg|mpkg|dmg|exe|msi|appx)$").expect("extension pattern is valid")
});

/// One application seen on one computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstallation {
    /// Computer key (serial number or inventory id)
    pub computer: String,
    pub app_name: String,
    pub version: String,
}

impl AppInstallation {
    pub fn new(
        computer: impl Into<String>,
        app_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            computer: computer.into(),
            app_name: app_name.into(),
            version: version.into(),
        }
    }
}

/// Grouping key for application names: trimmed, lowercased, extension removed.
pub fn normalize_app_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    EXTENSION.replace(&lowered, "").trim_end().to_string()
}

/// An installation below the fleet's latest version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct OutdatedInstall {
    pub computer: String,
    /// Display name of the application group
    pub app: String,
    pub installed: String,
    pub latest: String,
}

/// Per-application rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    /// Normalized grouping name
    pub name: String,
    /// First spelling seen
    pub display_name: String,
    pub version_count: usize,
    pub newest: String,
    pub oldest: String,
    pub at_latest: usize,
    pub outdated: usize,
    pub total: usize,
}

impl AppSummary {
    /// Whether the summary is worth reporting under `config`.
    pub fn is_reportable(&self, config: &InventoryConfig) -> bool {
        self.version_count >= config.min_version_count || self.total > config.always_report_above
    }
}

/// Output of [`detect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StalenessReport {
    /// Normalized name → raw latest version
    pub latest_by_app: BTreeMap<String, String>,
    /// Sorted by computer, then application, then installed version
    pub outdated: Vec<OutdatedInstall>,
    /// Sorted by normalized name
    pub summaries: Vec<AppSummary>,
}

impl StalenessReport {
    /// Latest observed version of `app_name`, in any spelling.
    pub fn latest(&self, app_name: &str) -> Option<&str> {
        self.latest_by_app
            .get(&normalize_app_name(app_name))
            .map(String::as_str)
    }

    pub fn reportable<'a>(
        &'a self,
        config: &'a InventoryConfig,
    ) -> impl Iterator<Item = &'a AppSummary> + 'a {
        self.summaries.iter().filter(move |s| s.is_reportable(config))
    }

    /// Outdated installs grouped per computer, computers in key order.
    pub fn by_computer(&self) -> BTreeMap<&str, Vec<&OutdatedInstall>> {
        let mut grouped: BTreeMap<&str, Vec<&OutdatedInstall>> = BTreeMap::new();
        for install in &self.outdated {
            grouped.entry(install.computer.as_str()).or_default().push(install);
        }
        grouped
    }
}

struct Group<'a> {
    display_name: &'a str,
    installs: Vec<(&'a AppInstallation, VersionKey)>,
}

/// Find the latest version per application and every outdated installation.
pub fn detect(installations: &[AppInstallation]) -> StalenessReport {
    let mut groups: BTreeMap<String, Group<'_>> = BTreeMap::new();
    for install in installations {
        groups
            .entry(normalize_app_name(&install.app_name))
            .or_insert_with(|| Group {
                display_name: install.app_name.trim(),
                installs: Vec::new(),
            })
            .installs
            .push((install, tokenize(&install.version)));
    }

    let mut report = StalenessReport::default();

    for (name, group) in groups {
        // First spelling wins on ties
        let Some((latest_install, latest_key)) = group
            .installs
            .iter()
            .fold(None, |best: Option<&(&AppInstallation, VersionKey)>, item| {
                match best {
                    Some(b) if b.1 >= item.1 => Some(b),
                    _ => Some(item),
                }
            })
        else {
            continue;
        };
        let oldest = group
            .installs
            .iter()
            .fold(None, |best: Option<&(&AppInstallation, VersionKey)>, item| {
                match best {
                    Some(b) if b.1 <= item.1 => Some(b),
                    _ => Some(item),
                }
            })
            .map(|(install, _)| install.version.trim().to_string())
            .unwrap_or_default();

        let latest = latest_install.version.trim().to_string();
        let mut at_latest = 0;
        let mut outdated = 0;
        for (install, key) in &group.installs {
            if key < latest_key {
                outdated += 1;
                report.outdated.push(OutdatedInstall {
                    computer: install.computer.clone(),
                    app: group.display_name.to_string(),
                    installed: install.version.trim().to_string(),
                    latest: latest.clone(),
                });
            } else {
                at_latest += 1;
            }
        }

        let distinct: BTreeSet<&str> = group
            .installs
            .iter()
            .map(|(install, _)| install.version.trim())
            .collect();

        report.summaries.push(AppSummary {
            name: name.clone(),
            display_name: group.display_name.to_string(),
            version_count: distinct.len(),
            newest: latest.clone(),
            oldest,
            at_latest,
            outdated,
            total: group.installs.len(),
        });
        report.latest_by_app.insert(name, latest);
    }

    report.outdated.sort();
    tracing::debug!(
        apps = report.summaries.len(),
        outdated = report.outdated.len(),
        "Detected stale installations"
    );
    report
}
