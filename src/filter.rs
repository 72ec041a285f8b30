//! Filtering and summarization over parcel collections
//!
//! Pure functions only: no carrier I/O and no clock reads. Callers pass
//! `now` so recency filtering stays deterministic and testable.
//!
//! Criteria combine with logical AND, and a parcel missing a field a
//! criterion needs (no category, no update timestamp, no returnable flag)
//! simply fails that criterion. Input order is preserved: the carrier lists
//! parcels newest first and clients rely on that.

use chrono::{DateTime, Duration, Utc};

use crate::types::{FilterCriteria, Parcel, ParcelSummary};

/// Select parcels matching every present criterion, preserving input order
pub fn filter_parcels<'a>(
    parcels: &'a [Parcel],
    criteria: &FilterCriteria,
    now: DateTime<Utc>,
) -> Vec<&'a Parcel> {
    parcels
        .iter()
        .filter(|parcel| matches(parcel, criteria, now))
        .collect()
}

fn matches(parcel: &Parcel, criteria: &FilterCriteria, now: DateTime<Utc>) -> bool {
    if let Some(status) = criteria.status {
        if parcel.status != status {
            return false;
        }
    }
    if let Some(category) = &criteria.category {
        match &parcel.category {
            Some(own) if own.eq_ignore_ascii_case(category) => {}
            _ => return false,
        }
    }
    if let Some(days) = criteria.within_days {
        // A window too wide to represent reaches past any representable
        // timestamp, so every dated parcel falls inside it
        let cutoff = Duration::try_days(days).and_then(|window| now.checked_sub_signed(window));
        let recent = match (cutoff, parcel.last_updated_at) {
            (Some(cutoff), Some(updated)) => updated >= cutoff,
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if !recent {
            return false;
        }
    }
    if let Some(returnable) = criteria.returnable {
        if parcel.returnable != Some(returnable) {
            return false;
        }
    }
    true
}

/// Build the concise single-parcel view served by the summary tool
pub fn summarize(parcel: &Parcel) -> ParcelSummary {
    ParcelSummary {
        identifier: parcel.id.clone(),
        status: parcel.status,
        status_phrase: parcel.status.phrase().to_string(),
        estimated_delivery: parcel.estimated_delivery(),
        returnable: parcel.returnable,
        destination: destination_line(parcel),
    }
}

/// One-line destination, "street houseNumber, postalCode city", built from
/// whatever address parts the carrier supplied
fn destination_line(parcel: &Parcel) -> Option<String> {
    let address = parcel.destination.as_ref()?.address.as_ref()?;

    let mut left = String::new();
    if let Some(street) = &address.street {
        left.push_str(street);
    }
    if let Some(number) = &address.house_number {
        if !left.is_empty() {
            left.push(' ');
        }
        left.push_str(number);
    }

    let mut right = String::new();
    if let Some(postal) = &address.postal_code {
        right.push_str(postal);
    }
    if let Some(city) = &address.city {
        if !right.is_empty() {
            right.push(' ');
        }
        right.push_str(city);
    }

    match (left.is_empty(), right.is_empty()) {
        (true, true) => None,
        (false, true) => Some(left),
        (true, false) => Some(right),
        (false, false) => Some(format!("{}, {}", left, right)),
    }
}
