use std::future::Future;
use std::sync::Arc;

use tokio::select;
use tokio::sync::oneshot;
use tracing::debug;

use crate::PipeError;
use crate::registry::Registry;
use crate::slot::{Ack, Claim, Handoff, Offer, Refusal, Role, Slot};

/// Pairs one producer with one consumer per key and hands the producer's stream over.
///
/// The rendezvous itself never times out: every wait races a cancellation future supplied by
/// the caller. Whatever way a request leaves, its key is removed from the registry.
pub struct Rendezvous<S> {
    registry: Arc<Registry<S>>,
}

impl<S> Clone for Rendezvous<S> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone() }
    }
}

impl<S> Default for Rendezvous<S> {
    fn default() -> Self {
        Self { registry: Arc::new(Registry::new()) }
    }
}

impl<S> Rendezvous<S> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Offers `stream` under `key` and waits until a consumer has copied it all.
    ///
    /// `wait_cancel` ends the wait for a consumer with [`PipeError::PeerTimeout`]. Once the
    /// stream is handed off, `ack_cancel` ends the wait for the acknowledgement with
    /// [`PipeError::AckTimeout`]; it is first polled after the handoff, so a timer created lazily
    /// inside it starts counting then. The stream is dropped on every path where no consumer
    /// took it.
    pub async fn produce<W, A>(&self, key: &str, stream: S, wait_cancel: W, ack_cancel: A) -> Result<(), PipeError>
    where
        W: Future<Output = ()>,
        A: Future<Output = ()>,
    {
        let (ack, ack_receiver) = Ack::channel();
        let (taken, mut taken_receiver) = oneshot::channel();
        let mut handoff = Handoff { stream, ack, taken: Some(taken) };

        let guard = loop {
            let slot = self.registry.get_or_create(key);
            match slot.offer(handoff) {
                Ok(offer) => {
                    match offer {
                        Offer::Delivered => debug!(key, "stream delivered to waiting consumer"),
                        Offer::Parked => debug!(key, "producer parked, waiting for consumer"),
                    }
                    break SlotGuard::new(self.registry.clone(), key, slot, Role::Producer);
                }
                Err((Refusal::Conflict, _)) => return Err(PipeError::Conflict),
                Err((Refusal::Aborted, returned)) => {
                    self.registry.remove(key, &slot);
                    handoff = returned;
                }
            }
        };

        let handed_off = select! {
            biased;
            result = &mut taken_receiver => result.is_ok(),
            _ = wait_cancel => false,
        };

        // a cancellation racing the handoff loses once the consumer holds the stream
        if !handed_off && guard.slot.reclaim().is_some() {
            return Err(PipeError::PeerTimeout);
        }

        debug!(key, "stream handed off, waiting for ack");
        wait_ack(ack_receiver, ack_cancel).await
    }

    /// Waits under `key` for a producer and takes its stream.
    ///
    /// `wait_cancel` ends the wait with [`PipeError::PeerTimeout`]. If it fires at the moment the
    /// stream lands, the stream wins. The returned [`Delivery`] keeps the key reserved until it is
    /// dropped.
    pub async fn consume<W>(&self, key: &str, wait_cancel: W) -> Result<Delivery<S>, PipeError>
    where
        W: Future<Output = ()>,
    {
        let (guard, claim) = loop {
            let slot = self.registry.get_or_create(key);
            match slot.claim() {
                Ok(claim) => break (SlotGuard::new(self.registry.clone(), key, slot, Role::Consumer), claim),
                Err(Refusal::Conflict) => return Err(PipeError::Conflict),
                Err(Refusal::Aborted) => {
                    self.registry.remove(key, &slot);
                }
            }
        };

        let handoff = match claim {
            Claim::Taken(handoff) => {
                debug!(key, "took parked stream");
                handoff
            }
            Claim::Parked(mut receiver) => {
                debug!(key, "consumer parked, waiting for producer");
                select! {
                    biased;
                    result = &mut receiver => result.map_err(|_| PipeError::PeerTimeout)?,
                    _ = wait_cancel => guard.slot.withdraw(&mut receiver)?,
                }
            }
        };

        Ok(Delivery { stream: handoff.stream, ack: handoff.ack, guard })
    }
}

async fn wait_ack<A>(ack_receiver: oneshot::Receiver<()>, ack_cancel: A) -> Result<(), PipeError>
where
    A: Future<Output = ()>,
{
    select! {
        biased;
        result = ack_receiver => result.map_err(|_| PipeError::AckTimeout),
        _ = ack_cancel => Err(PipeError::AckTimeout),
    }
}

/// A stream taken by a consumer, with the acknowledgement its producer waits for.
pub struct Delivery<S> {
    stream: S,
    ack: Ack,
    guard: SlotGuard<S>,
}

impl<S> Delivery<S> {
    pub fn into_parts(self) -> (S, Ack, SlotGuard<S>) {
        (self.stream, self.ack, self.guard)
    }
}

/// Keeps a key reserved for one party. On drop, aborts the slot if that party is still parked
/// and removes the slot from the registry.
pub struct SlotGuard<S> {
    registry: Arc<Registry<S>>,
    key: String,
    slot: Arc<Slot<S>>,
    role: Role,
}

impl<S> SlotGuard<S> {
    fn new(registry: Arc<Registry<S>>, key: &str, slot: Arc<Slot<S>>, role: Role) -> Self {
        Self { registry, key: key.to_string(), slot, role }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S> Drop for SlotGuard<S> {
    fn drop(&mut self) {
        self.slot.abandon(self.role);
        if self.registry.remove(&self.key, &self.slot) {
            debug!(key = %self.key, "slot cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::time::Duration;
    use tokio::time::sleep;

    type Pipe = Rendezvous<&'static str>;

    #[tokio::test]
    async fn pair_then_ack() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/x", "hello", pending(), pending()).await }
        });

        let delivery = pipe.consume("/x", pending()).await.unwrap();
        let (stream, ack, guard) = delivery.into_parts();
        assert_eq!(stream, "hello");
        assert_eq!(guard.key(), "/x");

        ack.acknowledge().unwrap();
        assert_eq!(producer.await.unwrap(), Ok(()));
        drop(guard);
        assert!(pipe.registry().is_empty());
    }

    #[tokio::test]
    async fn consumer_first_pairs() {
        let pipe = Pipe::new();

        let consumer = tokio::spawn({
            let pipe = pipe.clone();
            async move {
                let (stream, ack, _guard) = pipe.consume("/x", pending()).await.unwrap().into_parts();
                ack.acknowledge().unwrap();
                stream
            }
        });

        while !pipe.registry().contains("/x") {
            tokio::task::yield_now().await;
        }
        pipe.produce("/x", "hello", pending(), pending()).await.unwrap();
        assert_eq!(consumer.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn lone_consumer_times_out() {
        let pipe = Pipe::new();

        let result = pipe.consume("/y", sleep(Duration::from_millis(50))).await;

        assert!(matches!(result, Err(PipeError::PeerTimeout)));
        assert!(!pipe.registry().contains("/y"));
    }

    #[tokio::test]
    async fn lone_producer_times_out() {
        let pipe = Pipe::new();

        let result = pipe.produce("/y", "data", sleep(Duration::from_millis(50)), pending()).await;

        assert_eq!(result, Err(PipeError::PeerTimeout));
        assert!(pipe.registry().is_empty());
    }

    #[tokio::test]
    async fn consumer_vanishes_before_ack() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/z", "data", pending(), pending()).await }
        });

        let (stream, ack, guard) = pipe.consume("/z", pending()).await.unwrap().into_parts();
        assert_eq!(stream, "data");
        drop((ack, guard));

        assert_eq!(producer.await.unwrap(), Err(PipeError::AckTimeout));
        assert!(!pipe.registry().contains("/z"));
    }

    #[tokio::test]
    async fn ack_cancel_starts_after_handoff() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move {
                let ack_cancel = async { sleep(Duration::from_millis(50)).await };
                pipe.produce("/slow", "data", pending(), ack_cancel).await
            }
        });

        sleep(Duration::from_millis(80)).await;
        let (_stream, ack, _guard) = pipe.consume("/slow", pending()).await.unwrap().into_parts();
        sleep(Duration::from_millis(20)).await;
        ack.acknowledge().unwrap();

        assert_eq!(producer.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn ack_times_out() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/z", "data", pending(), sleep(Duration::from_millis(20))).await }
        });

        let (_stream, ack, _guard) = pipe.consume("/z", pending()).await.unwrap().into_parts();
        assert_eq!(producer.await.unwrap(), Err(PipeError::AckTimeout));
        assert_eq!(ack.acknowledge(), Err(PipeError::AckTimeout));
    }

    #[tokio::test]
    async fn wait_timeout_after_handoff_keeps_waiting_for_ack() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/x", "data", sleep(Duration::from_millis(30)), pending()).await }
        });

        let (_stream, ack, _guard) = pipe.consume("/x", pending()).await.unwrap().into_parts();
        sleep(Duration::from_millis(60)).await;
        ack.acknowledge().unwrap();

        assert_eq!(producer.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn second_producer_conflicts() {
        let pipe = Pipe::new();

        let first = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/x", "first", sleep(Duration::from_millis(100)), pending()).await }
        });
        while !pipe.registry().contains("/x") {
            tokio::task::yield_now().await;
        }

        let second = pipe.produce("/x", "second", pending(), pending()).await;
        assert_eq!(second, Err(PipeError::Conflict));

        let (stream, ack, _guard) = pipe.consume("/x", pending()).await.unwrap().into_parts();
        assert_eq!(stream, "first");
        ack.acknowledge().unwrap();
        assert_eq!(first.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn key_reusable_after_pairing() {
        let pipe = Pipe::new();

        for round in ["one", "two", "three"] {
            let producer = tokio::spawn({
                let pipe = pipe.clone();
                async move { pipe.produce("/again", round, pending(), pending()).await }
            });
            let (stream, ack, guard) = pipe.consume("/again", pending()).await.unwrap().into_parts();
            assert_eq!(stream, round);
            ack.acknowledge().unwrap();
            drop(guard);
            assert_eq!(producer.await.unwrap(), Ok(()));
            assert!(pipe.registry().is_empty());
        }

        assert_eq!(pipe.consume("/again", sleep(Duration::from_millis(10))).await.err(), Some(PipeError::PeerTimeout));
        assert!(pipe.registry().is_empty());
    }

    #[tokio::test]
    async fn dropped_producer_clears_key() {
        let pipe = Pipe::new();

        let producer = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.produce("/gone", "data", pending(), pending()).await }
        });
        while !pipe.registry().contains("/gone") {
            tokio::task::yield_now().await;
        }
        producer.abort();
        let _ = producer.await;

        assert!(pipe.registry().is_empty());
        assert!(matches!(pipe.consume("/gone", sleep(Duration::from_millis(10))).await, Err(PipeError::PeerTimeout)));
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let pipe = Pipe::new();
        let keys = ["/a", "/b", "/c", "/d"];

        let producers: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let pipe = pipe.clone();
                tokio::spawn(async move { pipe.produce(key, key, pending(), pending()).await })
            })
            .collect();

        for key in keys.iter().rev() {
            let (stream, ack, _guard) = pipe.consume(key, pending()).await.unwrap().into_parts();
            assert_eq!(stream, *key);
            ack.acknowledge().unwrap();
        }

        for producer in producers {
            assert_eq!(producer.await.unwrap(), Ok(()));
        }
        assert!(pipe.registry().is_empty());
    }
}
