//! Team performance statistics (pure aggregation, no IO).
//!
//! Hierarchy: team → batch → user. All levels are computed from one slice of
//! items, so a single result never mixes two store snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use lotsync_core::{BatchId, DomainError, TeamId, UserId};

use crate::item::{InventoryItem, ItemStatus};

/// Date-range bucket requested by a dashboard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsRange {
    Today,
    Last7Days,
    Last30Days,
    MonthToDate,
    Custom { from: NaiveDate, to: NaiveDate },
}

impl StatsRange {
    /// Parse the `range`/`from`/`to` query triple. Missing `range` means today.
    pub fn parse(
        range: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Self, DomainError> {
        match range.map(str::trim) {
            None | Some("") | Some("today") => Ok(StatsRange::Today),
            Some("7d") | Some("last_7_days") => Ok(StatsRange::Last7Days),
            Some("30d") | Some("last_30_days") => Ok(StatsRange::Last30Days),
            Some("mtd") | Some("month_to_date") => Ok(StatsRange::MonthToDate),
            Some("custom") => match (from, to) {
                (Some(from), Some(to)) => Ok(StatsRange::Custom { from, to }),
                _ => Err(DomainError::validation("custom range requires from and to")),
            },
            Some(other) => Err(DomainError::validation(format!("unknown range: {other}"))),
        }
    }

    /// Resolve to concrete inclusive dates relative to `today`.
    pub fn resolve(&self, today: NaiveDate) -> Result<DateSpan, DomainError> {
        let back = |days: u64| today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        let span = match *self {
            StatsRange::Today => DateSpan { from: today, to: today },
            StatsRange::Last7Days => DateSpan { from: back(6), to: today },
            StatsRange::Last30Days => DateSpan { from: back(29), to: today },
            StatsRange::MonthToDate => DateSpan {
                from: today.with_day(1).unwrap_or(today),
                to: today,
            },
            StatsRange::Custom { from, to } => {
                if from > to {
                    return Err(DomainError::validation("range start is after range end"));
                }
                DateSpan { from, to }
            }
        };
        Ok(span)
    }
}

/// Inclusive calendar-date interval (UTC).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateSpan {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateSpan {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.from <= day && day <= self.to
    }
}

/// Optional narrowing of a team's items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsFilter {
    pub batch: Option<BatchId>,
    pub assigned_to: Option<UserId>,
    /// Empty = every status.
    pub statuses: BTreeSet<ItemStatus>,
}

impl StatsFilter {
    pub fn matches(&self, item: &InventoryItem) -> bool {
        self.batch.is_none_or(|b| b == item.batch_id)
            && self.assigned_to.is_none_or(|u| item.assigned_to == Some(u))
            && (self.statuses.is_empty() || self.statuses.contains(&item.status))
    }

    /// Stable textual form; equal filters always produce equal signatures.
    pub fn signature(&self) -> String {
        let batch = self.batch.map(|b| b.to_string()).unwrap_or_else(|| "*".into());
        let user = self.assigned_to.map(|u| u.to_string()).unwrap_or_else(|| "*".into());
        let statuses = if self.statuses.is_empty() {
            "*".to_string()
        } else {
            self.statuses
                .iter()
                .map(ItemStatus::as_str)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!("batch={batch};user={user};status={statuses}")
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub available: u64,
    pub assigned: u64,
    pub active: u64,
    pub retired: u64,
    pub total: u64,
    /// Items whose activation falls inside the requested span.
    pub activated_in_range: u64,
}

impl StatusCounts {
    fn add(&mut self, item: &InventoryItem, span: &DateSpan) {
        match item.status {
            ItemStatus::Available => self.available += 1,
            ItemStatus::Assigned => self.assigned += 1,
            ItemStatus::Active => self.active += 1,
            ItemStatus::Retired => self.retired += 1,
        }
        self.total += 1;
        if item.activated_at.is_some_and(|at| span.contains(at)) {
            self.activated_in_range += 1;
        }
    }

    pub fn rates(&self) -> Rates {
        let handed_out = self.assigned + self.active;
        Rates {
            assignment_rate: ratio(handed_out, self.total),
            activation_rate: ratio(self.activated_in_range, handed_out),
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    /// (assigned + active) / total.
    pub assignment_rate: f64,
    /// activated_in_range / (assigned + active).
    pub activation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    /// `None` groups items not handed to any agent.
    pub user_id: Option<UserId>,
    pub counts: StatusCounts,
    pub rates: Rates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub batch_id: BatchId,
    pub counts: StatusCounts,
    pub rates: Rates,
    pub users: Vec<UserStats>,
}

/// Immutable stats snapshot for one team, range and filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team_id: TeamId,
    pub span: DateSpan,
    pub filter: String,
    pub counts: StatusCounts,
    pub rates: Rates,
    pub batches: Vec<BatchStats>,
    pub computed_at: DateTime<Utc>,
}

/// Aggregate `items` into team → batch → user statistics.
///
/// Items not owned by `team_id` or not matching `filter` are ignored.
pub fn aggregate_team(
    team_id: TeamId,
    span: DateSpan,
    filter: &StatsFilter,
    items: &[InventoryItem],
    computed_at: DateTime<Utc>,
) -> TeamStats {
    let mut team = StatusCounts::default();
    let mut batches: BTreeMap<BatchId, (StatusCounts, BTreeMap<Option<UserId>, StatusCounts>)> =
        BTreeMap::new();

    for item in items
        .iter()
        .filter(|i| i.team_id == team_id && filter.matches(i))
    {
        team.add(item, &span);
        let (batch, users) = batches.entry(item.batch_id).or_default();
        batch.add(item, &span);
        users.entry(item.assigned_to).or_default().add(item, &span);
    }

    let batches = batches
        .into_iter()
        .map(|(batch_id, (counts, users))| BatchStats {
            batch_id,
            counts,
            rates: counts.rates(),
            users: users
                .into_iter()
                .map(|(user_id, counts)| UserStats {
                    user_id,
                    counts,
                    rates: counts.rates(),
                })
                .collect(),
        })
        .collect();

    TeamStats {
        team_id,
        span,
        filter: filter.signature(),
        counts: team,
        rates: team.rates(),
        batches,
        computed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(serial: &str, team: TeamId, batch: BatchId) -> InventoryItem {
        InventoryItem::new(ItemId::parse(serial).unwrap(), team, batch, Utc::now())
    }

    #[test]
    fn ranges_resolve_to_inclusive_days() {
        let today = date(2026, 3, 15);
        assert_eq!(
            StatsRange::Last7Days.resolve(today).unwrap(),
            DateSpan { from: date(2026, 3, 9), to: today }
        );
        assert_eq!(
            StatsRange::MonthToDate.resolve(today).unwrap(),
            DateSpan { from: date(2026, 3, 1), to: today }
        );
        assert!(
            StatsRange::Custom { from: today, to: date(2026, 3, 1) }
                .resolve(today)
                .is_err()
        );
    }

    #[test]
    fn range_parsing() {
        assert_eq!(StatsRange::parse(None, None, None).unwrap(), StatsRange::Today);
        assert_eq!(StatsRange::parse(Some("7d"), None, None).unwrap(), StatsRange::Last7Days);
        assert!(StatsRange::parse(Some("custom"), Some(date(2026, 1, 1)), None).is_err());
        assert!(StatsRange::parse(Some("forever"), None, None).is_err());
    }

    #[test]
    fn signature_is_order_independent() {
        let mut a = StatsFilter::default();
        a.statuses.insert(ItemStatus::Active);
        a.statuses.insert(ItemStatus::Assigned);
        let mut b = StatsFilter::default();
        b.statuses.insert(ItemStatus::Assigned);
        b.statuses.insert(ItemStatus::Active);

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), StatsFilter::default().signature());
    }

    #[test]
    fn counts_rates_and_hierarchy() {
        let team = TeamId::new();
        let other = TeamId::new();
        let batch = BatchId::new();
        let agent = UserId::new();
        let now = Utc::now();
        let span = StatsRange::Today.resolve(now.date_naive()).unwrap();

        let items = vec![
            item("s1", team, batch),
            item("s2", team, batch).assign(agent),
            item("s3", team, batch).assign(agent).activate(now),
            item("s4", team, batch).assign(agent).activate(now - chrono::Duration::days(40)),
            item("s5", other, batch),
        ];

        let stats = aggregate_team(team, span, &StatsFilter::default(), &items, now);

        assert_eq!(stats.counts.total, 4);
        assert_eq!(stats.counts.available, 1);
        assert_eq!(stats.counts.assigned, 1);
        assert_eq!(stats.counts.active, 2);
        assert_eq!(stats.counts.activated_in_range, 1);
        assert_eq!(stats.rates.assignment_rate, 0.75);
        assert!((stats.rates.activation_rate - 1.0 / 3.0).abs() < 1e-12);

        assert_eq!(stats.batches.len(), 1);
        let users = &stats.batches[0].users;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, None);
        assert_eq!(users[1].user_id, Some(agent));
        assert_eq!(users[1].counts.total, 3);
    }

    #[test]
    fn empty_team_has_zero_rates() {
        let now = Utc::now();
        let span = StatsRange::Today.resolve(now.date_naive()).unwrap();
        let stats = aggregate_team(TeamId::new(), span, &StatsFilter::default(), &[], now);

        assert_eq!(stats.counts, StatusCounts::default());
        assert_eq!(stats.rates, Rates::default());
        assert!(stats.batches.is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn status() -> impl Strategy<Value = ItemStatus> {
            prop::sample::select(ItemStatus::ALL.to_vec())
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: child levels add up to their parent, and rates stay in [0, 1].
            #[test]
            fn levels_are_consistent(rows in proptest::collection::vec((0usize..3, 0usize..3, status()), 0..60)) {
                let team = TeamId::new();
                let batches = [BatchId::new(), BatchId::new(), BatchId::new()];
                let agents = [UserId::new(), UserId::new(), UserId::new()];
                let now = Utc::now();
                let span = StatsRange::Today.resolve(now.date_naive()).unwrap();

                let items: Vec<_> = rows
                    .iter()
                    .enumerate()
                    .map(|(n, (b, u, st))| {
                        let mut it = item(&format!("s{n}"), team, batches[*b]);
                        it.status = *st;
                        if *st != ItemStatus::Available {
                            it.assigned_to = Some(agents[*u]);
                        }
                        if *st == ItemStatus::Active {
                            it.activated_at = Some(now);
                        }
                        it
                    })
                    .collect();

                let stats = aggregate_team(team, span, &StatsFilter::default(), &items, now);

                prop_assert_eq!(stats.counts.total as usize, items.len());
                let batch_total: u64 = stats.batches.iter().map(|b| b.counts.total).sum();
                prop_assert_eq!(batch_total, stats.counts.total);
                for b in &stats.batches {
                    let user_total: u64 = b.users.iter().map(|u| u.counts.total).sum();
                    prop_assert_eq!(user_total, b.counts.total);
                }
                prop_assert!((0.0..=1.0).contains(&stats.rates.assignment_rate));
                prop_assert!((0.0..=1.0).contains(&stats.rates.activation_rate));
            }
        }
    }
}
