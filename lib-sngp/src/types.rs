//! Core SNGP types
//!
//! Identifiers, closed enumerations for every status/category field, and the
//! pagination/date-range primitives shared by all read queries.
//!
//! Every enum here is validated at construction time (`FromStr`), so no
//! string-typed status ever crosses the storage boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SngpError;

// ============================================================================
// IDENTIFIERS
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn get(self) -> u64 {
                self.0
            }

            /// Big-endian encoding (sorts numerically)
            pub fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
                Self(u64::from_be_bytes(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Reward pool identifier
    PoolId,
    "pool"
);
id_type!(
    /// Participant identifier (owned by the external user system)
    UserId,
    "user"
);
id_type!(
    /// Source machine that produced a point event
    MachineId,
    "machine"
);
id_type!(
    /// Distribution run identifier
    RunId,
    "run"
);
id_type!(
    /// Participation or reward record identifier
    RecordId,
    "record"
);
id_type!(
    /// Wallet identifier (owned by the wallet subsystem)
    WalletId,
    "wallet"
);

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Pool category tag
///
/// A `GlobalActivity` pool is perpetual: it is never deactivated when its
/// points run out. `Country` pools close on exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolCategory {
    Country,
    GlobalActivity,
}

impl PoolCategory {
    pub const ALL: &'static [PoolCategory] = &[PoolCategory::Country, PoolCategory::GlobalActivity];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolCategory::Country => "country_pool",
            PoolCategory::GlobalActivity => "global_activity_pool",
        }
    }

    /// Perpetual pools stay ACTIVE after exhaustion
    pub fn is_perpetual(&self) -> bool {
        matches!(self, PoolCategory::GlobalActivity)
    }
}

impl fmt::Display for PoolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolCategory {
    type Err = SngpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "country_pool" | "country" => Ok(PoolCategory::Country),
            "global_activity_pool" | "global_activity" | "activity" => Ok(PoolCategory::GlobalActivity),
            other => Err(SngpError::InvalidInput(format!("unknown pool category '{}'", other))),
        }
    }
}

/// Pool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    Active,
    Inactive,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Active => "ACTIVE",
            PoolStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = SngpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(PoolStatus::Active),
            "INACTIVE" => Ok(PoolStatus::Inactive),
            other => Err(SngpError::InvalidInput(format!("unknown pool status '{}'", other))),
        }
    }
}

/// Participation row status; INACTIVE rows are excluded from distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationStatus {
    Active,
    Inactive,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Active => "ACTIVE",
            ParticipationStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationStatus {
    type Err = SngpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ParticipationStatus::Active),
            "INACTIVE" => Ok(ParticipationStatus::Inactive),
            other => Err(SngpError::InvalidInput(format!(
                "unknown participation status '{}'",
                other
            ))),
        }
    }
}

/// Distribution run status
///
/// `Pending -> WaitForConfirmation -> Completed`; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    WaitForConfirmation,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::WaitForConfirmation => "WAIT_FOR_CONFIRMATION",
            RunStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    /// Allowed forward transitions (an operator may force a PENDING run)
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::WaitForConfirmation)
                | (RunStatus::Pending, RunStatus::Completed)
                | (RunStatus::WaitForConfirmation, RunStatus::Completed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = SngpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "WAIT_FOR_CONFIRMATION" => Ok(RunStatus::WaitForConfirmation),
            "COMPLETED" => Ok(RunStatus::Completed),
            other => Err(SngpError::InvalidInput(format!("unknown run status '{}'", other))),
        }
    }
}

/// Reward record claim status; `Claimed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardStatus {
    Unclaimed,
    Claimed,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Unclaimed => "UNCLAIMED",
            RewardStatus::Claimed => "CLAIMED",
        }
    }
}

impl fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardStatus {
    type Err = SngpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNCLAIMED" => Ok(RewardStatus::Unclaimed),
            "CLAIMED" => Ok(RewardStatus::Claimed),
            other => Err(SngpError::InvalidInput(format!("unknown reward status '{}'", other))),
        }
    }
}

/// Why a computed reward is not receivable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LostReason {
    InactiveUser,
    NoDailyReferenceReward,
}

impl LostReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LostReason::InactiveUser => "INACTIVE_USER",
            LostReason::NoDailyReferenceReward => "NO_DAILY_REFERENCE_REWARD",
        }
    }
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PAGINATION & DATE RANGES
// ============================================================================

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn first(limit: u32) -> Self {
        Self { page: 1, limit }
    }

    /// Clamp to `[1, max]`; a zero limit falls back to `default_limit`
    pub fn normalized(self, default_limit: u32, max_limit: u32) -> Self {
        let limit = if self.limit == 0 { default_limit } else { self.limit };
        Self {
            page: self.page.max(1),
            limit: limit.clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 0 }
    }
}

/// One page of an ordered result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Slice an already filtered and ordered result set
    pub fn from_items(items: Vec<T>, request: PageRequest) -> Self {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(request.offset())
            .take(request.limit as usize)
            .collect();
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit as u64)
    }

    pub fn has_next(&self) -> bool {
        (self.page as u64) < self.total_pages()
    }
}

/// Half-open timestamp window `[from, to)`; open ends are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| *ts >= from) && self.to.map_or(true, |to| *ts < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::WaitForConfirmation));
        assert!(RunStatus::WaitForConfirmation.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::WaitForConfirmation.can_transition_to(RunStatus::Pending));
    }

    #[test]
    fn test_enum_parsing_rejects_unknown_values() {
        assert_eq!("country_pool".parse::<PoolCategory>().unwrap(), PoolCategory::Country);
        assert_eq!(" active ".parse::<PoolStatus>().unwrap(), PoolStatus::Active);
        assert_eq!(
            "wait_for_confirmation".parse::<RunStatus>().unwrap(),
            RunStatus::WaitForConfirmation
        );
        assert!("archived".parse::<PoolStatus>().is_err());
        assert!("galactic".parse::<PoolCategory>().is_err());
        assert!("REFUNDED".parse::<RewardStatus>().is_err());
    }

    #[test]
    fn test_only_global_activity_is_perpetual() {
        assert!(PoolCategory::GlobalActivity.is_perpetual());
        assert!(!PoolCategory::Country.is_perpetual());
    }

    #[test]
    fn test_page_request_normalization() {
        let req = PageRequest::new(0, 0).normalized(20, 100);
        assert_eq!(req, PageRequest::new(1, 20));

        let req = PageRequest::new(3, 500).normalized(20, 100);
        assert_eq!(req, PageRequest::new(3, 100));
        assert_eq!(req.offset(), 200);
    }

    #[test]
    fn test_page_slicing() {
        let page = Page::from_items((1..=25).collect::<Vec<u32>>(), PageRequest::new(3, 10));
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages(), 3);
        assert!(!page.has_next());

        let beyond = Page::from_items(vec![1u32, 2], PageRequest::new(5, 10));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 2);
    }

    #[test]
    fn test_date_range_is_half_open() {
        let now = Utc::now();
        let range = DateRange::between(now, now + Duration::hours(1));
        assert!(range.contains(&now));
        assert!(range.contains(&(now + Duration::minutes(59))));
        assert!(!range.contains(&(now + Duration::hours(1))));
        assert!(!range.contains(&(now - Duration::seconds(1))));
        assert!(DateRange::all().contains(&now));
    }

    #[test]
    fn test_id_display_and_byte_order() {
        assert_eq!(PoolId(7).to_string(), "pool#7");
        assert!(UserId(1).to_be_bytes() < UserId(256).to_be_bytes());
        assert_eq!(RunId::from_be_bytes(RunId(42).to_be_bytes()), RunId(42));
    }
}
