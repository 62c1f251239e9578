/// Counter for consume iterations that ended in a caught failure, labelled by kind
pub const CONSUMER_PROCESS_FAILED: &str = "consume_process_failed";

/// Histogram of the size of each batch handed to a handler
pub const CONSUMER_BATCH_SIZE: &str = "consume_batch_size";

/// Counter for records successfully handled
pub const CONSUMER_RECORDS_HANDLED: &str = "consume_records_handled_total";

/// Counter for partition offsets committed
pub const CONSUMER_OFFSETS_COMMITTED: &str = "consume_offsets_committed_total";

/// Counter for failed attempts to rewind to a batch the handler rejected
pub const CONSUMER_REWIND_FAILED: &str = "consume_rewind_failed_total";

/// Counter for partitions moved by rebalances, labelled by event type
pub const CONSUMER_REBALANCE_EVENTS: &str = "consume_rebalance_partitions_total";
