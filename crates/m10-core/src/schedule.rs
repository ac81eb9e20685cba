//! Due-date and availability-date schedule for the ten monthly invoices of a
//! contract.
//!
//! Installations on days 1..=28 fall due 25 days later; installations on
//! days 29..=31 are pinned to the 26th of the following month. Every later
//! invoice is the first due date shifted by whole calendar months, clamped to
//! the end of shorter months, so each date stays valid without drifting.

use chrono::{Datelike, Days, Months, NaiveDate};
use thiserror::Error;

pub const INVOICE_COUNT: u8 = 10;
pub const FIRST_DUE_OFFSET_DAYS: u64 = 25;
pub const LAST_FLOATING_INSTALL_DAY: u32 = 28;
pub const PINNED_DUE_DAY: u32 = 26;
pub const AVAILABILITY_OFFSET_DAYS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invoice sequence {0} outside 1..=10")]
    SequenceOutOfRange(u8),
    #[error("date arithmetic overflow from {0}")]
    Overflow(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledInvoice {
    pub seq: u8,
    pub due_date: NaiveDate,
    pub availability_date: NaiveDate,
}

pub fn due_date(installation: NaiveDate, n: u8) -> Result<NaiveDate, ScheduleError> {
    check_seq(n)?;
    shift_months(first_due_date(installation)?, n)
}

/// Invoice 1 becomes available three days after installation; later
/// invoices shift that date by the same month offset as their due date.
pub fn availability_date(installation: NaiveDate, n: u8) -> Result<NaiveDate, ScheduleError> {
    check_seq(n)?;
    let first = installation
        .checked_add_days(Days::new(AVAILABILITY_OFFSET_DAYS))
        .ok_or(ScheduleError::Overflow(installation))?;
    shift_months(first, n)
}

/// All ten invoices, in sequence order.
pub fn schedule(installation: NaiveDate) -> Result<Vec<ScheduledInvoice>, ScheduleError> {
    (1..=INVOICE_COUNT)
        .map(|seq| {
            Ok(ScheduledInvoice {
                seq,
                due_date: due_date(installation, seq)?,
                availability_date: availability_date(installation, seq)?,
            })
        })
        .collect()
}

fn first_due_date(installation: NaiveDate) -> Result<NaiveDate, ScheduleError> {
    let overflow = ScheduleError::Overflow(installation);
    if installation.day() <= LAST_FLOATING_INSTALL_DAY {
        return installation
            .checked_add_days(Days::new(FIRST_DUE_OFFSET_DAYS))
            .ok_or(overflow);
    }

    installation
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(1)))
        .and_then(|d| d.with_day(PINNED_DUE_DAY))
        .ok_or(overflow)
}

fn shift_months(base: NaiveDate, n: u8) -> Result<NaiveDate, ScheduleError> {
    base.checked_add_months(Months::new(u32::from(n) - 1))
        .ok_or(ScheduleError::Overflow(base))
}

fn check_seq(n: u8) -> Result<(), ScheduleError> {
    if (1..=INVOICE_COUNT).contains(&n) {
        Ok(())
    } else {
        Err(ScheduleError::SequenceOutOfRange(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn late_month_installation_pins_to_the_26th() {
        let installed = d(2025, 12, 29);
        assert_eq!(due_date(installed, 1).unwrap(), d(2026, 1, 26));
        assert_eq!(due_date(installed, 2).unwrap(), d(2026, 2, 26));
        assert_eq!(due_date(d(2026, 1, 31), 1).unwrap(), d(2026, 2, 26));
        assert_eq!(due_date(d(2024, 2, 29), 1).unwrap(), d(2024, 3, 26));
    }

    #[test]
    fn early_month_installation_is_due_25_days_later() {
        let installed = d(2025, 12, 4);
        assert_eq!(due_date(installed, 1).unwrap(), d(2025, 12, 29));
        assert_eq!(due_date(installed, 2).unwrap(), d(2026, 1, 29));
        // February has no 29th in 2026; March returns to it.
        assert_eq!(due_date(installed, 3).unwrap(), d(2026, 2, 28));
        assert_eq!(due_date(installed, 4).unwrap(), d(2026, 3, 29));
    }

    #[test]
    fn availability_starts_three_days_after_installation() {
        let installed = d(2025, 12, 4);
        assert_eq!(availability_date(installed, 1).unwrap(), d(2025, 12, 7));
        assert_eq!(availability_date(installed, 2).unwrap(), d(2026, 1, 7));
    }

    #[test]
    fn sequence_bounds_are_enforced() {
        let installed = d(2025, 12, 4);
        assert_eq!(
            due_date(installed, 0),
            Err(ScheduleError::SequenceOutOfRange(0))
        );
        assert_eq!(
            availability_date(installed, 11),
            Err(ScheduleError::SequenceOutOfRange(11))
        );
    }

    #[test]
    fn schedule_is_monotonic_for_every_installation_day() {
        for year in [2023, 2024, 2025, 2026] {
            for month in 1..=12 {
                for day in 1..=31 {
                    let Some(installed) = NaiveDate::from_ymd_opt(year, month, day) else {
                        continue;
                    };
                    let plan = schedule(installed).unwrap();
                    assert_eq!(plan.len(), usize::from(INVOICE_COUNT));
                    assert_eq!(plan[0].availability_date, installed + Days::new(3));

                    for (idx, item) in plan.iter().enumerate() {
                        assert_eq!(usize::from(item.seq), idx + 1);
                        assert!(item.availability_date <= item.due_date, "{installed}: {item:?}");
                        assert!(item.due_date > installed);
                    }
                    for pair in plan.windows(2) {
                        assert!(pair[0].due_date < pair[1].due_date, "{installed}: {pair:?}");
                        assert!(pair[0].availability_date < pair[1].availability_date);
                    }

                    if day >= 29 {
                        assert!(plan.iter().all(|i| i.due_date.day() == PINNED_DUE_DAY));
                    } else {
                        assert_eq!((plan[0].due_date - installed).num_days(), 25);
                    }
                }
            }
        }
    }
}
