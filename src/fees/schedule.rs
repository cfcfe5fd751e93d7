use chrono::{Datelike, Days, Months, NaiveDate};

use crate::model::Frequency;

fn months_until_due(frequency: &Frequency) -> u32 {
    match frequency {
        Frequency::OneTime => 1,
        Frequency::Yearly => 12,
        Frequency::SemesterWise => 6,
        Frequency::Other(_) => 1,
    }
}

/// Days past the end of a short target month roll into the next one:
/// Jan 31 + 1 month is Mar 3, Feb 29 + 1 year is Mar 1.
pub fn due_date(frequency: &Frequency, assigned_on: NaiveDate) -> NaiveDate {
    let months = Months::new(months_until_due(frequency));
    let carry = Days::new(u64::from(assigned_on.day() - 1));
    assigned_on
        .with_day(1)
        .and_then(|first| first.checked_add_months(months))
        .and_then(|first| first.checked_add_days(carry))
        .unwrap_or(NaiveDate::MAX)
}
