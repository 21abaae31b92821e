//! hookscope-source-jsonl: tails the day-partitioned JSONL event log
//! written by the capture hook and feeds new records into the event store.

pub mod ingest;
pub mod paths;
pub mod watcher;
