//! Media-group analysis: folds a flat fetched message list into a
//! sequence of atomic units, preserving source order.

mod unit;

pub use unit::{AtomicUnit, MediaGroup};

use crate::client::{Message, MEDIA_GROUP_CAP};
use tracing::debug;

/// Fold messages into atomic units.
///
/// Consecutive messages sharing a non-empty group id fold into one
/// group; a group also closes at the service's album cap, so an
/// over-long run splits into capped groups. Everything else emits a
/// singleton. Source order is preserved across units.
pub fn fold_units(messages: Vec<Message>) -> Vec<AtomicUnit> {
    let mut units = Vec::new();
    let mut run: Vec<Message> = Vec::new();
    let mut run_id: Option<String> = None;

    let flush = |run: &mut Vec<Message>, run_id: &mut Option<String>, units: &mut Vec<AtomicUnit>| {
        if let Some(id) = run_id.take() {
            if !run.is_empty() {
                units.push(AtomicUnit::Group(MediaGroup::new(id, std::mem::take(run))));
            }
        }
    };

    for message in messages {
        match &message.group_id {
            Some(group_id) => {
                let same_run = run_id.as_deref() == Some(group_id.as_str());
                if !same_run || run.len() >= MEDIA_GROUP_CAP {
                    flush(&mut run, &mut run_id, &mut units);
                    run_id = Some(group_id.clone());
                }
                run.push(message);
            }
            None => {
                flush(&mut run, &mut run_id, &mut units);
                units.push(AtomicUnit::Singleton(message));
            }
        }
    }
    flush(&mut run, &mut run_id, &mut units);

    debug!(
        units = units.len(),
        groups = units.iter().filter(|u| u.is_group()).count(),
        "media-group analysis complete"
    );

    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelRef, MediaKind};
    use chrono::Utc;

    fn message(id: i64, group_id: Option<&str>, size: u64) -> Message {
        Message {
            channel: ChannelRef::new("@src"),
            id,
            date: Utc::now(),
            text: None,
            caption: None,
            group_id: group_id.map(str::to_string),
            kind: MediaKind::Photo,
            size,
            file_name: None,
        }
    }

    #[test]
    fn singletons_stay_single() {
        let units = fold_units(vec![message(1, None, 5), message(2, None, 7)]);
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| !u.is_group()));
    }

    #[test]
    fn consecutive_group_ids_fold() {
        let units = fold_units(vec![
            message(1, None, 1),
            message(2, Some("g1"), 2),
            message(3, Some("g1"), 3),
            message(4, Some("g1"), 4),
            message(5, None, 5),
        ]);

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].first_id(), 1);
        assert!(units[1].is_group());
        assert_eq!(units[1].len(), 3);
        assert_eq!(units[1].weight(), 9);
        assert_eq!(units[2].first_id(), 5);
    }

    #[test]
    fn group_boundary_on_id_change() {
        let units = fold_units(vec![
            message(1, Some("g1"), 1),
            message(2, Some("g1"), 1),
            message(3, Some("g2"), 1),
        ]);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].len(), 2);
        assert_eq!(units[1].len(), 1);
    }

    #[test]
    fn group_splits_at_service_cap() {
        let messages: Vec<Message> =
            (1..=12).map(|id| message(id, Some("g1"), 1)).collect();
        let units = fold_units(messages);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].len(), 10);
        assert_eq!(units[1].len(), 2);
    }

    #[test]
    fn source_order_preserved() {
        let units = fold_units(vec![
            message(10, None, 1),
            message(11, Some("g1"), 1),
            message(12, Some("g1"), 1),
            message(13, None, 1),
        ]);

        let first_ids: Vec<i64> = units.iter().map(AtomicUnit::first_id).collect();
        assert_eq!(first_ids, vec![10, 11, 13]);
    }

    #[test]
    fn empty_input_yields_no_units() {
        assert!(fold_units(vec![]).is_empty());
    }
}
