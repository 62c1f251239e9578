use std::collections::BTreeMap;
use std::fmt;

use rdkafka::topic_partition_list::TopicPartitionListElem;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition_number)
    }
}

/// Where a record lives in the broker, needed to commit or rewind past it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    partition: Partition,
    offset: i64,
}

impl Position {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// A record as it comes off the wire, before deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub position: Position,
    pub payload: Option<Vec<u8>>,
}

impl RawRecord {
    pub fn new(position: Position, payload: Option<Vec<u8>>) -> Self {
        Self { position, payload }
    }
}

/// A deserialized record. Only `payload` is ever handed to handlers.
#[derive(Debug, Clone)]
pub struct Record<T> {
    payload: T,
    position: Position,
}

impl<T> Record<T> {
    pub fn new(payload: T, position: Position) -> Self {
        Self { payload, position }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// One offset per partition.
///
/// Built either from the highest offset of each partition in a set of
/// positions (what gets committed after a batch was handled) or from the
/// lowest one (where to seek back to when a batch has to be delivered again).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetMap {
    offsets: BTreeMap<Partition, i64>,
}

impl OffsetMap {
    pub fn highest_of<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        Self::fold(positions, i64::max)
    }

    pub fn lowest_of<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        Self::fold(positions, i64::min)
    }

    fn fold<'a>(
        positions: impl IntoIterator<Item = &'a Position>,
        pick: fn(i64, i64) -> i64,
    ) -> Self {
        let mut offsets = BTreeMap::new();
        for position in positions {
            offsets
                .entry(position.partition.clone())
                .and_modify(|current: &mut i64| *current = pick(*current, position.offset))
                .or_insert(position.offset);
        }
        Self { offsets }
    }

    pub fn get(&self, partition: &Partition) -> Option<i64> {
        self.offsets.get(partition).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Partition, i64)> {
        self.offsets.iter().map(|(p, o)| (p, *o))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl fmt::Display for OffsetMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .offsets
            .iter()
            .map(|(partition, offset)| format!("{partition}@{offset}"))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(topic: &str, partition: i32, offset: i64) -> Position {
        Position::new(Partition::new(topic, partition), offset)
    }

    #[test]
    fn offset_map_keeps_one_entry_per_partition() {
        let positions = vec![
            pos("events", 0, 10),
            pos("events", 1, 4),
            pos("events", 0, 12),
            pos("events", 0, 11),
            pos("other", 0, 2),
        ];

        let highest = OffsetMap::highest_of(&positions);
        assert_eq!(highest.len(), 3);
        assert_eq!(highest.get(&Partition::new("events", 0)), Some(12));
        assert_eq!(highest.get(&Partition::new("events", 1)), Some(4));
        assert_eq!(highest.get(&Partition::new("other", 0)), Some(2));

        let lowest = OffsetMap::lowest_of(&positions);
        assert_eq!(lowest.get(&Partition::new("events", 0)), Some(10));
        assert_eq!(lowest.to_string(), "events[0]@10,events[1]@4,other[0]@2");
    }

    #[test]
    fn offset_map_from_nothing_is_empty() {
        assert!(OffsetMap::highest_of(&Vec::new()).is_empty());
    }
}
