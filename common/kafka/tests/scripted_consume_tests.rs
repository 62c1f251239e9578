use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use common_kafka::test_utils::ScriptedBroker;
use common_kafka::{
    BatchConsumer, LoopState, NoopConsumerMetrics, PayloadFormat, PerRecord, RecordHandler,
    Subscription,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "bids";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Bid {
    listing_id: u64,
    amount_cents: u64,
}

struct BidLedger {
    accepted: Arc<Mutex<Vec<Bid>>>,
    rejected_once: Mutex<bool>,
}

#[async_trait]
impl RecordHandler<Bid> for BidLedger {
    async fn handle(&self, bid: Bid, _cancel: CancellationToken) -> anyhow::Result<()> {
        // the first zero bid fails, its redelivery goes through
        if bid.amount_cents == 0 {
            let mut rejected = self.rejected_once.lock().unwrap();
            if !*rejected {
                *rejected = true;
                bail!("zero bid on listing {}", bid.listing_id);
            }
        }
        self.accepted.lock().unwrap().push(bid);
        Ok(())
    }
}

fn bid(listing_id: u64, amount_cents: u64) -> Bid {
    Bid {
        listing_id,
        amount_cents,
    }
}

#[tokio::test]
async fn record_handler_sees_bincode_payloads_once_committed() {
    let (broker, control) = ScriptedBroker::new();
    let bids = vec![bid(1, 500), bid(1, 0), bid(2, 1200), bid(3, 700)];
    for b in &bids {
        let payload = PayloadFormat::Bincode.serialize(b).unwrap();
        control.publish(TOPIC, 0, Some(payload));
    }

    let subscription = Subscription::new([TOPIC])
        .with_format(PayloadFormat::Bincode)
        .with_max_chunk_size(10);
    let consumer = BatchConsumer::new(broker, &subscription, Arc::new(NoopConsumerMetrics));
    let mut state = consumer.state();
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let ledger = BidLedger {
        accepted: accepted.clone(),
        rejected_once: Mutex::new(false),
    };
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(&PerRecord(ledger), cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while accepted.lock().unwrap().len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bids were not all accepted");
    cancel.cancel();
    let summary = task.await.unwrap();

    assert_eq!(*accepted.lock().unwrap(), bids);
    assert_eq!(summary.handler_failures, 1);
    assert_eq!(*state.borrow_and_update(), LoopState::Stopped);
    assert_eq!(control.close_count(), 1);

    let last = control.commits().last().cloned().unwrap();
    assert_eq!(last.get(&common_kafka::types::Partition::new(TOPIC, 0)), Some(3));
}
