//! Pure partition enumerators.
//!
//! Every enumerator is a function of its configuration only, so the same
//! job always proposes the same universe and stored progress can be read
//! as a subset of it.

use std::ops::RangeInclusive;

use chrono::{Datelike, Months, NaiveDate};

use crate::domain::{BasisOfRecord, PartitionKey, PartitionStatus, TaxonRef};
use crate::progress::ProgressRecord;

pub trait PartitionEnumerator {
    fn describe(&self) -> String;
    fn enumerate(&self) -> Vec<PartitionKey>;
}

/// Last day covered by a monthly partition: 28 in February, 30 otherwise.
/// The remaining days belong to the boundary-day sweep.
pub fn monthly_window_end(month: u32) -> u32 {
    if month == 2 { 28 } else { 30 }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

#[derive(Debug, Clone)]
pub struct MonthlyTaxonEnumerator {
    pub taxa: Vec<TaxonRef>,
    pub years: RangeInclusive<i32>,
}

impl PartitionEnumerator for MonthlyTaxonEnumerator {
    fn describe(&self) -> String {
        format!(
            "{} taxa x months {}..={}",
            self.taxa.len(),
            self.years.start(),
            self.years.end()
        )
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        for taxon in &self.taxa {
            for year in self.years.clone() {
                for month in 1..=12 {
                    keys.push(PartitionKey::TaxonMonth {
                        taxon_id: taxon.id,
                        year,
                        month,
                    });
                }
            }
        }
        keys
    }
}

/// Days past each monthly window: the 31st of long months and Feb 29.
#[derive(Debug, Clone)]
pub struct BoundaryDayEnumerator {
    pub taxa: Vec<TaxonRef>,
    pub years: RangeInclusive<i32>,
}

impl PartitionEnumerator for BoundaryDayEnumerator {
    fn describe(&self) -> String {
        format!(
            "{} taxa x boundary days {}..={}",
            self.taxa.len(),
            self.years.start(),
            self.years.end()
        )
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        for taxon in &self.taxa {
            for year in self.years.clone() {
                for month in 1..=12 {
                    for day in monthly_window_end(month) + 1..=days_in_month(year, month) {
                        keys.push(PartitionKey::TaxonDay {
                            taxon_id: taxon.id,
                            year,
                            month,
                            day,
                        });
                    }
                }
            }
        }
        keys
    }
}

#[derive(Debug, Clone)]
pub struct BasisOfRecordEnumerator {
    pub bases: Vec<BasisOfRecord>,
}

impl PartitionEnumerator for BasisOfRecordEnumerator {
    fn describe(&self) -> String {
        let names = self
            .bases
            .iter()
            .map(BasisOfRecord::as_str)
            .collect::<Vec<_>>();
        format!("basis of record [{}]", names.join(", "))
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        self.bases.iter().copied().map(PartitionKey::Basis).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TaxonEnumerator {
    pub taxa: Vec<TaxonRef>,
}

impl PartitionEnumerator for TaxonEnumerator {
    fn describe(&self) -> String {
        format!("{} whole taxa", self.taxa.len())
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        self.taxa
            .iter()
            .map(|taxon| PartitionKey::Taxon { taxon_id: taxon.id })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PlaceEnumerator {
    pub place_id: u64,
}

impl PartitionEnumerator for PlaceEnumerator {
    fn describe(&self) -> String {
        format!("place {}", self.place_id)
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        vec![PartitionKey::Place {
            place_id: self.place_id,
        }]
    }
}

/// Re-partitions truncated months into single days of the same window.
#[derive(Debug, Clone)]
pub struct TruncatedMonthSplitter {
    months: Vec<PartitionKey>,
}

impl TruncatedMonthSplitter {
    pub fn from_progress(progress: &ProgressRecord) -> Self {
        let months = progress
            .keys_with_status(PartitionStatus::Truncated)
            .into_iter()
            .filter(|key| matches!(key, PartitionKey::TaxonMonth { .. }))
            .collect();
        Self { months }
    }

    pub fn months(&self) -> &[PartitionKey] {
        &self.months
    }
}

impl PartitionEnumerator for TruncatedMonthSplitter {
    fn describe(&self) -> String {
        format!("{} truncated months split by day", self.months.len())
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        for key in &self.months {
            if let PartitionKey::TaxonMonth {
                taxon_id,
                year,
                month,
            } = *key
            {
                for day in 1..=monthly_window_end(month) {
                    keys.push(PartitionKey::TaxonDay {
                        taxon_id,
                        year,
                        month,
                        day,
                    });
                }
            }
        }
        keys
    }
}
