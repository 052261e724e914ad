//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`DatasetId`] - Validated pool + optional child path
//! - [`Retention`] - Calendar-aware retention window
//! - [`SnapshotRef`] - A `dataset@snapshot` pair
//!
//! Snapshot names produced by this crate are UTC timestamps in the fixed-width
//! `YYYYMMDDHHmm` form, so lexical order equals chronological order. See
//! [`snapshot_name`] and [`parse_snapshot_time`].
//!
//! # Examples
//!
//! ```
//! use snapwarden::core::types::DatasetId;
//!
//! let ds = DatasetId::new("tank", Some("home/alice")).unwrap();
//! assert_eq!(ds.joined(), "tank/home/alice");
//! assert_eq!(ds.pool(), "tank");
//!
//! let parsed = DatasetId::parse("tank/home/alice").unwrap();
//! assert_eq!(parsed, ds);
//!
//! assert!(DatasetId::new("", None).is_err());
//! ```

use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format of snapshot names created by snapshot jobs.
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d%H%M";

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("invalid retention: {0}")]
    InvalidRetention(String),
}

/// A validated dataset identifier.
///
/// A dataset is a pool plus an optional child path. The pool must be
/// non-empty and may not contain `/` or `@`; an empty child is treated as
/// absent so that `tank` and `tank/` name the same dataset.
///
/// Deserializes either from a joined string (`"tank/home"`) or from a table
/// with `pool` and `dataset` keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "DatasetSpec", into = "String")]
pub struct DatasetId {
    pool: String,
    child: Option<String>,
}

impl DatasetId {
    /// Create a new validated dataset identifier.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidDataset` if the pool is empty or either part
    /// contains characters that cannot appear in a dataset name.
    pub fn new(pool: impl Into<String>, child: Option<&str>) -> Result<Self, TypeError> {
        let pool = pool.into();
        if pool.is_empty() {
            return Err(TypeError::InvalidDataset("pool cannot be empty".into()));
        }
        if pool.contains('/') {
            return Err(TypeError::InvalidDataset(format!(
                "pool '{pool}' cannot contain '/'"
            )));
        }

        let child = child
            .map(|c| c.trim_matches('/'))
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let id = Self { pool, child };
        id.validate()?;
        Ok(id)
    }

    /// Parse a joined dataset name such as `tank/home/alice`.
    pub fn parse(joined: &str) -> Result<Self, TypeError> {
        match joined.split_once('/') {
            Some((pool, child)) => Self::new(pool, Some(child)),
            None => Self::new(joined, None),
        }
    }

    fn validate(&self) -> Result<(), TypeError> {
        let joined = self.joined();
        if joined.contains('@') {
            return Err(TypeError::InvalidDataset(format!(
                "'{joined}' cannot contain '@'"
            )));
        }
        if joined.contains("//") {
            return Err(TypeError::InvalidDataset(format!(
                "'{joined}' has an empty path component"
            )));
        }
        if joined.chars().any(|c| c.is_ascii_control()) {
            return Err(TypeError::InvalidDataset(
                "dataset cannot contain control characters".into(),
            ));
        }
        Ok(())
    }

    /// The pool component.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// The child path below the pool, if any.
    pub fn child(&self) -> Option<&str> {
        self.child.as_deref()
    }

    /// The full dataset name: `pool` or `pool/child`.
    pub fn joined(&self) -> String {
        match &self.child {
            Some(child) => format!("{}/{}", self.pool, child),
            None => self.pool.clone(),
        }
    }

    /// Reference a snapshot of this dataset.
    pub fn snapshot(&self, name: impl Into<String>) -> SnapshotRef {
        SnapshotRef {
            dataset: self.clone(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.child {
            Some(child) => write!(f, "{}/{}", self.pool, child),
            None => write!(f, "{}", self.pool),
        }
    }
}

impl From<DatasetId> for String {
    fn from(id: DatasetId) -> Self {
        id.joined()
    }
}

/// Serialized forms accepted for a [`DatasetId`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DatasetSpec {
    Joined(String),
    Parts {
        pool: String,
        #[serde(default)]
        dataset: Option<String>,
    },
}

impl TryFrom<DatasetSpec> for DatasetId {
    type Error = TypeError;

    fn try_from(spec: DatasetSpec) -> Result<Self, Self::Error> {
        match spec {
            DatasetSpec::Joined(joined) => Self::parse(&joined),
            DatasetSpec::Parts { pool, dataset } => Self::new(pool, dataset.as_deref()),
        }
    }
}

/// A snapshot of a specific dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotRef {
    pub dataset: DatasetId,
    pub name: String,
}

impl std::fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.dataset, self.name)
    }
}

/// How long snapshots are kept before a clean job may destroy them.
///
/// Years and months are applied as calendar months (clamped to the end of
/// shorter months), days and minutes as fixed durations.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use snapwarden::core::types::Retention;
///
/// let keep = Retention { days: 2, ..Default::default() };
/// let now = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
/// let until = keep.keep_until(now).unwrap();
/// assert_eq!(until, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Retention {
    pub years: u32,
    pub months: u32,
    pub days: u32,
    pub minutes: u32,
}

impl Retention {
    /// The oldest instant that is still retained: `now - retention`.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRetention` if the window reaches outside the
    /// representable date range.
    pub fn keep_until(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TypeError> {
        let months = self
            .years
            .checked_mul(12)
            .and_then(|m| m.checked_add(self.months))
            .ok_or_else(|| TypeError::InvalidRetention("month count overflows".into()))?;

        let shifted = now
            .checked_sub_months(Months::new(months))
            .and_then(|t| t.checked_sub_signed(Duration::days(i64::from(self.days))))
            .and_then(|t| t.checked_sub_signed(Duration::minutes(i64::from(self.minutes))));

        shifted.ok_or_else(|| TypeError::InvalidRetention(format!("{self} is out of range")))
    }

    /// True if every component is zero.
    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0 && self.minutes == 0
    }
}

impl std::fmt::Display for Retention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}y{}m{}d{}min",
            self.years, self.months, self.days, self.minutes
        )
    }
}

/// Name for a snapshot taken at `now`.
pub fn snapshot_name(now: DateTime<Utc>) -> String {
    now.format(SNAPSHOT_TIME_FORMAT).to_string()
}

/// Parse the creation time encoded in a snapshot name.
///
/// Returns `None` for names not created by this tool.
pub fn parse_snapshot_time(name: &str) -> Option<DateTime<Utc>> {
    if name.len() != 12 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(name, SNAPSHOT_TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dataset_joined_with_and_without_child() {
        let pool = DatasetId::new("tank", None).unwrap();
        assert_eq!(pool.joined(), "tank");
        assert_eq!(pool.child(), None);

        let child = DatasetId::new("tank", Some("home/bob")).unwrap();
        assert_eq!(child.joined(), "tank/home/bob");
        assert_eq!(child.to_string(), "tank/home/bob");
    }

    #[test]
    fn dataset_empty_child_is_absent() {
        let ds = DatasetId::new("tank", Some("")).unwrap();
        assert_eq!(ds, DatasetId::new("tank", None).unwrap());
    }

    #[test]
    fn dataset_rejects_invalid() {
        assert!(DatasetId::new("", Some("x")).is_err());
        assert!(DatasetId::new("tank/x", None).is_err());
        assert!(DatasetId::parse("tank/home@snap").is_err());
        assert!(DatasetId::parse("tank/a//b").is_err());
    }

    #[test]
    fn dataset_parse_round_trips_joined() {
        for name in ["tank", "tank/a", "tank/a/b/c"] {
            assert_eq!(DatasetId::parse(name).unwrap().joined(), name);
        }
    }

    #[test]
    fn dataset_deserializes_from_string_or_table() {
        #[derive(Deserialize)]
        struct Holder {
            a: DatasetId,
            b: DatasetId,
        }
        let holder: Holder = toml::from_str(
            r#"
            a = "tank/home"
            b = { pool = "tank", dataset = "home" }
            "#,
        )
        .unwrap();
        assert_eq!(holder.a, holder.b);
    }

    #[test]
    fn snapshot_name_is_fixed_width() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 9, 59).unwrap();
        assert_eq!(snapshot_name(now), "202403050709");
    }

    #[test]
    fn parse_snapshot_time_accepts_own_names_only() {
        let t = parse_snapshot_time("202401020304").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap());

        assert!(parse_snapshot_time("manual-backup").is_none());
        assert!(parse_snapshot_time("20240102").is_none());
        assert!(parse_snapshot_time("202413020304").is_none());
    }

    #[test]
    fn retention_subtracts_calendar_months() {
        let keep = Retention {
            months: 1,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        assert_eq!(
            keep.keep_until(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn retention_combines_all_units() {
        let keep = Retention {
            years: 1,
            months: 0,
            days: 1,
            minutes: 30,
        };
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(
            keep.keep_until(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 9, 11, 30, 0).unwrap()
        );
    }

    #[test]
    fn retention_zero_is_now() {
        let keep = Retention::default();
        assert!(keep.is_zero());
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(keep.keep_until(now).unwrap(), now);
    }
}
