use crate::parser::ObservationRecord;

/// Informational records first, actionable records after, each group in its
/// original order. Informational panels pack two per row, so grouping them up
/// front keeps the overlay short.
pub fn prioritize(mut records: Vec<ObservationRecord>) -> Vec<ObservationRecord> {
    // sort_by_key is stable
    records.sort_by_key(|record| u8::from(record.action_required));
    records
}
