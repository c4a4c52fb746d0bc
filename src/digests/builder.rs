//! Pure transformation of a claimed record batch into a structured digest.

use std::collections::BTreeMap;

use crate::models::{Digest, DigestGroup, Record};

/// Groups a batch of records by their domain grouping key and orders the
/// result deterministically: groups by (count desc, latest timestamp desc,
/// group id asc), records within a group by timestamp desc.
///
/// Malformed records (no usable `group_id`) are skipped, never failed; each
/// skip produces a diagnostic line in the returned log. An input where every
/// record is malformed yields the empty digest sentinel.
pub fn build_digest(records: &[Record]) -> (Digest, Vec<String>) {
    let mut logs = Vec::new();
    let mut grouped: BTreeMap<u64, Vec<Record>> = BTreeMap::new();

    for record in records {
        match record.group_id() {
            Some(group_id) => grouped.entry(group_id).or_default().push(record.clone()),
            None => {
                logs.push(format!(
                    "skipped malformed record at {}: missing or invalid group_id",
                    record.timestamp
                ));
            }
        }
    }

    let mut groups: Vec<DigestGroup> = grouped
        .into_iter()
        .map(|(group_id, mut members)| {
            members.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            // `members` is non-empty by construction.
            let latest = members[0].timestamp;
            let title = members.iter().find_map(|r| r.title().map(str::to_owned));
            DigestGroup { group_id, title, count: members.len(), latest, records: members }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.latest.cmp(&a.latest))
            .then_with(|| a.group_id.cmp(&b.group_id))
    });

    (Digest { groups }, logs)
}
