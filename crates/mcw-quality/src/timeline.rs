use std::cmp::Ordering;

use mcw_core::{impact_rank, TimelineEvent};

fn is_priority(event: &TimelineEvent) -> bool {
    event.event_type.is_some_and(|t| t.is_synthetic())
}

fn relevance(a: &TimelineEvent, b: &TimelineEvent) -> Ordering {
    match (is_priority(a), is_priority(b)) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let by_impact = impact_rank(b.impact).cmp(&impact_rank(a.impact));
    if by_impact != Ordering::Equal {
        return by_impact;
    }

    if let (Some(pa), Some(pb)) = (a.change_percent, b.change_percent) {
        let by_change = pb.total_cmp(&pa);
        if by_change != Ordering::Equal {
            return by_change;
        }
    }

    // newest first; undated events sink
    b.event_at.cmp(&a.event_at)
}

/// Order events for the activity timeline, most relevant first.
///
/// Pattern and alert events lead, then impact (high > medium > low > unspecified), then change
/// percentage when both events carry one, then recency. Ties keep input order.
pub fn sort_events_by_relevance(events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    merge_sort_by(events, &relevance)
}

// The change-percentage step only applies when both sides carry a value, so the comparator is not
// transitive over mixed inputs. std's sort may panic on such comparators; a plain merge sort is
// stable and always terminates.
fn merge_sort_by<T, F>(mut items: Vec<T>, cmp: &F) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    if items.len() <= 1 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort_by(items, cmp);
    let right = merge_sort_by(right, cmp);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(r, l) == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged
}
