#![forbid(unsafe_code)]

mod cache;
mod core;
mod execution;
mod indexes;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(core::SQL);
    sql.push_str(execution::SQL);
    sql.push_str(cache::SQL);
    sql.push_str(indexes::SQL);
    sql
}
