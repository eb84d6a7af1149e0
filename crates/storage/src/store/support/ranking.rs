#![forbid(unsafe_code)]

// Round-robin order across tenants: a job's place in its tenant's FIFO comes
// first, then tenants that dequeued least recently (never = 0) win ties.
// Only jobs dequeueable at `?1` (now, ms) take a place, so an errored job
// still inside its retry delay does not push its tenant's queued jobs back.
pub(in crate::store) const RANKED_QUEUE_SQL: &str = r#"
        WITH candidates AS (
          SELECT
            q.id,
            q.user_id,
            RANK() OVER (PARTITION BY q.user_id ORDER BY q.created_at_ms, q.id) AS place_in_user_queue,
            ld.latest_dequeue_seq
          FROM execution_jobs q
          LEFT JOIN last_dequeues ld ON ld.user_id = q.user_id
          WHERE q.cancel = 0
            AND (q.state = 'queued'
                 OR (q.state = 'errored' AND COALESCE(q.process_after_ms, 0) <= ?1))
        )
        SELECT
          id,
          user_id,
          place_in_user_queue,
          ROW_NUMBER() OVER (
            ORDER BY place_in_user_queue, COALESCE(latest_dequeue_seq, 0), id
          ) AS place_in_global_queue
        FROM candidates
        ORDER BY place_in_global_queue ASC
"#;
