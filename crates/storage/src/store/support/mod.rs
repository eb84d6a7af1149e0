#![forbid(unsafe_code)]

mod counters;
mod ranking;
pub(in crate::store) mod schema;

pub(in crate::store) use counters::next_counter_tx;
pub(in crate::store) use ranking::RANKED_QUEUE_SQL;

/// `?start, ?start+1, ...` for an `IN (...)` list of `count` values.
pub(in crate::store) fn sql_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
