//! Data models for Patcher
//!
//! This module defines the API payloads returned by Jamf Pro and the SOFA
//! feed, and the domain records assembled from them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Display layout of release dates
pub const RELEASE_DATE_FORMAT: &str = "%b %d %Y";

/// Jamf returns identifiers as strings on most endpoints and as numbers on some
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    match Id::deserialize(deserializer)? {
        Id::Text(text) => Ok(text),
        Id::Number(number) => Ok(number.to_string()),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    }))
}

/// Convert an API timestamp into the report date layout (`Jan 15 2024`)
///
/// Accepts RFC 3339 and `%Y-%m-%dT%H:%M:%S%z`; returns `None` otherwise.
pub fn convert_release_date(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()?;
    Some(parsed.format(RELEASE_DATE_FORMAT).to_string())
}

/// Package attached to a patch software title configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPackage {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub package_id: Option<String>,
    pub version: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Item of the patch software title configuration listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub software_title_id: Option<String>,
    #[serde(default)]
    pub packages: Vec<PatchPackage>,
}

impl PolicyPayload {
    /// Identifier the patch summary of this policy reports as `softwareTitleId`
    pub fn title_key(&self) -> &str {
        self.software_title_id.as_deref().unwrap_or(&self.id)
    }

    /// Path of the patch summary for this policy
    pub fn summary_path(&self) -> String {
        format!(
            "{}/{}/patch-summary",
            crate::constants::jamf::PATCH_TITLES_PATH,
            self.id
        )
    }
}

/// Patch summary of one software title configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub software_title_id: String,
    pub title: String,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    pub up_to_date: u64,
    pub out_of_date: u64,
}

/// Patch compliance of one software title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchTitle {
    pub title_id: String,
    pub title: String,
    pub released: String,
    pub hosts_patched: u64,
    pub missing_patch: u64,
    pub latest_version: String,
    pub completion_percent: f64,
    pub total_hosts: u64,
    #[serde(default)]
    pub packages: Vec<PatchPackage>,
}

impl PatchTitle {
    /// Build a record, deriving `total_hosts` and `completion_percent`
    pub fn new(
        title_id: impl Into<String>,
        title: impl Into<String>,
        released: impl Into<String>,
        hosts_patched: u64,
        missing_patch: u64,
        latest_version: impl Into<String>,
    ) -> Self {
        let total_hosts = hosts_patched + missing_patch;
        Self {
            title_id: title_id.into(),
            title: title.into(),
            released: released.into(),
            hosts_patched,
            missing_patch,
            latest_version: latest_version.into(),
            completion_percent: completion_percent(hosts_patched, total_hosts),
            total_hosts,
            packages: Vec::new(),
        }
    }

    /// Attach the packages of the matching policy
    pub fn merge_policy(&mut self, policy: &PolicyPayload) {
        if self.packages.is_empty() {
            self.packages = policy.packages.clone();
        }
    }

    /// Release date parsed from the report layout
    pub fn released_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.released, RELEASE_DATE_FORMAT).ok()
    }

    /// Whether the title was released less than `window` before `now`
    pub fn released_within(&self, window: ChronoDuration, now: DateTime<Utc>) -> bool {
        match self.released_date().and_then(|date| date.and_hms_opt(0, 0, 0)) {
            Some(released) => released.and_utc() >= now - window,
            None => false,
        }
    }
}

impl From<SummaryPayload> for PatchTitle {
    fn from(summary: SummaryPayload) -> Self {
        let released = summary
            .release_date
            .as_deref()
            .map(|raw| convert_release_date(raw).unwrap_or_else(|| raw.to_string()))
            .unwrap_or_default();
        PatchTitle::new(
            summary.software_title_id,
            summary.title,
            released,
            summary.up_to_date,
            summary.out_of_date,
            summary.latest_version.unwrap_or_default(),
        )
    }
}

/// Percentage of patched hosts, rounded to two decimals
pub fn completion_percent(hosts_patched: u64, total_hosts: u64) -> f64 {
    if total_hosts == 0 {
        return 0.0;
    }
    let percent = hosts_patched as f64 / total_hosts as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Column a record set can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Title,
    Released,
    HostsPatched,
    MissingPatch,
    LatestVersion,
    CompletionPercent,
    TotalHosts,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "title" => Ok(SortKey::Title),
            "released" => Ok(SortKey::Released),
            "hosts_patched" => Ok(SortKey::HostsPatched),
            "missing_patch" => Ok(SortKey::MissingPatch),
            "latest_version" => Ok(SortKey::LatestVersion),
            "completion_percent" => Ok(SortKey::CompletionPercent),
            "total_hosts" => Ok(SortKey::TotalHosts),
            other => Err(format!("Invalid column name for sorting: {}", other)),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Title => "title",
            SortKey::Released => "released",
            SortKey::HostsPatched => "hosts_patched",
            SortKey::MissingPatch => "missing_patch",
            SortKey::LatestVersion => "latest_version",
            SortKey::CompletionPercent => "completion_percent",
            SortKey::TotalHosts => "total_hosts",
        };
        f.write_str(name)
    }
}

/// Stable sort of records by the given column, ascending
pub fn sort_records(records: &mut [PatchTitle], key: SortKey) {
    records.sort_by(|a, b| match key {
        SortKey::Title => a.title.cmp(&b.title),
        SortKey::Released => a.released_date().cmp(&b.released_date()),
        SortKey::HostsPatched => a.hosts_patched.cmp(&b.hosts_patched),
        SortKey::MissingPatch => a.missing_patch.cmp(&b.missing_patch),
        SortKey::LatestVersion => a.latest_version.cmp(&b.latest_version),
        SortKey::CompletionPercent => a
            .completion_percent
            .partial_cmp(&b.completion_percent)
            .unwrap_or(Ordering::Equal),
        SortKey::TotalHosts => a.total_hosts.cmp(&b.total_hosts),
    });
}

/// Item of the mobile device listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

impl DeviceRef {
    pub fn detail_path(&self) -> String {
        format!(
            "{}/{}/detail",
            crate::constants::jamf::MOBILE_DEVICES_PATH,
            self.id
        )
    }
}

/// Mobile device detail
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetailPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    pub os_version: String,
}

/// OS version of one managed mobile device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub serial_number: Option<String>,
    pub os_version: String,
}

impl DeviceRecord {
    /// Major component of the OS version (`17` for `17.4.1`)
    pub fn major_version(&self) -> &str {
        self.os_version.split('.').next().unwrap_or_default()
    }
}

impl From<DeviceDetailPayload> for DeviceRecord {
    fn from(detail: DeviceDetailPayload) -> Self {
        Self {
            device_id: detail.id,
            serial_number: detail.serial_number,
            os_version: detail.os_version,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SofaFeed {
    #[serde(rename = "OSVersions", default)]
    os_versions: Vec<SofaOsVersion>,
}

#[derive(Debug, Deserialize)]
struct SofaOsVersion {
    #[serde(rename = "OSVersion")]
    os_version: String,
    #[serde(rename = "Latest")]
    latest: SofaLatest,
}

#[derive(Debug, Deserialize)]
struct SofaLatest {
    #[serde(rename = "ProductVersion")]
    product_version: String,
    #[serde(rename = "ReleaseDate", default)]
    release_date: Option<String>,
}

/// Latest release of one major iOS version, from the SOFA feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SofaRelease {
    pub os_version: String,
    pub product_version: String,
    pub release_date: String,
}

/// Parse the SOFA iOS feed into its latest releases
pub fn parse_sofa_feed(body: &[u8]) -> serde_json::Result<Vec<SofaRelease>> {
    let feed: SofaFeed = serde_json::from_slice(body)?;
    Ok(feed
        .os_versions
        .into_iter()
        .map(|version| SofaRelease {
            os_version: version.os_version,
            release_date: version
                .latest
                .release_date
                .as_deref()
                .and_then(convert_release_date)
                .unwrap_or_default(),
            product_version: version.latest.product_version,
        })
        .collect())
}

/// One record per major iOS version with at least one enrolled device
///
/// A device counts as patched when its OS version equals the latest product
/// version SOFA reports for its major version.
pub fn ios_patch_titles(devices: &[DeviceRecord], releases: &[SofaRelease]) -> Vec<PatchTitle> {
    let mut counts: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for device in devices {
        let major = device.major_version();
        let Some(release) = releases.iter().find(|r| r.os_version == major) else {
            continue;
        };
        let entry = counts.entry(major).or_insert((0, 0));
        entry.1 += 1;
        if device.os_version == release.product_version {
            entry.0 += 1;
        }
    }

    releases
        .iter()
        .filter_map(|release| {
            let (patched, total) = counts.get(release.os_version.as_str())?;
            Some(PatchTitle::new(
                format!("ios-{}", release.os_version),
                format!("iOS {}", release.product_version),
                release.release_date.clone(),
                *patched,
                total - patched,
                release.product_version.clone(),
            ))
        })
        .collect()
}
