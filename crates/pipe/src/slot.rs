//! The per-key state machine mediating one handoff.
//!
//! ```text
//! Empty ──producer──▶ ProducerWaiting ──consumer──▶ HandedOff
//!   │                        │
//!   └──consumer──▶ ConsumerWaiting ──producer──▶ HandedOff
//!
//! ProducerWaiting / ConsumerWaiting ──waiter gives up──▶ Aborted
//! ```
//!
//! Every transition happens under the slot's lock and never awaits. Waiting happens outside the
//! lock on the oneshot channels the states carry.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::PipeError;

/// What the producer passes to the consumer.
pub(crate) struct Handoff<S> {
    pub(crate) stream: S,
    pub(crate) ack: Ack,
    /// fired when a consumer takes the stream
    pub(crate) taken: Option<oneshot::Sender<()>>,
}

impl<S> Handoff<S> {
    fn mark_taken(&mut self) {
        if let Some(taken) = self.taken.take() {
            let _ = taken.send(());
        }
    }
}

/// The consumer's single-use acknowledgement that it copied the whole stream.
#[derive(Debug)]
pub struct Ack {
    sender: oneshot::Sender<()>,
}

impl Ack {
    pub(crate) fn channel() -> (Ack, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (Ack { sender }, receiver)
    }

    /// Tells the producer the copy is complete.
    ///
    /// Fails with [`PipeError::AckTimeout`] when the producer stopped waiting.
    pub fn acknowledge(self) -> Result<(), PipeError> {
        self.sender.send(()).map_err(|_| PipeError::AckTimeout)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Producer,
    Consumer,
}

pub(crate) enum Offer {
    /// a consumer was waiting and now owns the stream
    Delivered,
    Parked,
}

pub(crate) enum Claim<S> {
    Taken(Handoff<S>),
    Parked(oneshot::Receiver<Handoff<S>>),
}

pub(crate) enum Refusal {
    Conflict,
    /// the slot is finished, retry with a fresh one
    Aborted,
}

enum State<S> {
    Empty,
    ProducerWaiting(Handoff<S>),
    ConsumerWaiting(oneshot::Sender<Handoff<S>>),
    HandedOff,
    Aborted,
}

pub struct Slot<S> {
    state: Mutex<State<S>>,
}

impl<S> Default for Slot<S> {
    fn default() -> Self {
        Self { state: Mutex::new(State::Empty) }
    }
}

impl<S> Slot<S> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Producer arrival: hands the stream to a waiting consumer or parks it.
    pub(crate) fn offer(&self, handoff: Handoff<S>) -> Result<Offer, (Refusal, Handoff<S>)> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::HandedOff) {
            State::ConsumerWaiting(sender) => {
                let mut handoff = handoff;
                let taken = handoff.taken.take();
                match sender.send(handoff) {
                    Ok(()) => {
                        if let Some(taken) = taken {
                            let _ = taken.send(());
                        }
                        Ok(Offer::Delivered)
                    }
                    // the consumer is gone, take its place
                    Err(mut handoff) => {
                        handoff.taken = taken;
                        *state = State::ProducerWaiting(handoff);
                        Ok(Offer::Parked)
                    }
                }
            }
            State::ProducerWaiting(parked) if parked.ack.is_closed() => {
                *state = State::ProducerWaiting(handoff);
                Ok(Offer::Parked)
            }
            State::Empty => {
                *state = State::ProducerWaiting(handoff);
                Ok(Offer::Parked)
            }
            State::Aborted => {
                *state = State::Aborted;
                Err((Refusal::Aborted, handoff))
            }
            previous => {
                *state = previous;
                Err((Refusal::Conflict, handoff))
            }
        }
    }

    /// Consumer arrival: takes a parked stream or parks a receiver for one.
    pub(crate) fn claim(&self) -> Result<Claim<S>, Refusal> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::HandedOff) {
            State::ProducerWaiting(mut handoff) if !handoff.ack.is_closed() => {
                handoff.mark_taken();
                Ok(Claim::Taken(handoff))
            }
            State::ConsumerWaiting(sender) if !sender.is_closed() => {
                *state = State::ConsumerWaiting(sender);
                Err(Refusal::Conflict)
            }
            State::Empty | State::ProducerWaiting(_) | State::ConsumerWaiting(_) => {
                let (sender, receiver) = oneshot::channel();
                *state = State::ConsumerWaiting(sender);
                Ok(Claim::Parked(receiver))
            }
            State::HandedOff => Err(Refusal::Conflict),
            State::Aborted => {
                *state = State::Aborted;
                Err(Refusal::Aborted)
            }
        }
    }

    /// The producer's wait was cancelled: takes the parked stream back unless a consumer already
    /// has it.
    pub(crate) fn reclaim(&self) -> Option<S> {
        let mut state = self.state.lock();
        if !matches!(*state, State::ProducerWaiting(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, State::Aborted) {
            State::ProducerWaiting(handoff) => Some(handoff.stream),
            _ => None,
        }
    }

    /// The consumer's wait was cancelled: gives up the slot unless the handoff already landed.
    pub(crate) fn withdraw(&self, receiver: &mut oneshot::Receiver<Handoff<S>>) -> Result<Handoff<S>, PipeError> {
        let mut state = self.state.lock();
        if matches!(*state, State::ConsumerWaiting(_)) {
            *state = State::Aborted;
            return Err(PipeError::PeerTimeout);
        }
        // the producer sends under this lock, so a handed off stream is already in the channel
        receiver.try_recv().map_err(|_| PipeError::PeerTimeout)
    }

    /// Aborts the slot if `role` is still parked in it. Dropping the parked stream closes it.
    pub(crate) fn abandon(&self, role: Role) {
        let mut state = self.state.lock();
        let parked = match &*state {
            State::ProducerWaiting(_) => role == Role::Producer,
            State::ConsumerWaiting(_) => role == Role::Consumer,
            _ => false,
        };
        if parked {
            *state = State::Aborted;
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(*self.state.lock(), State::Aborted)
    }

    pub fn is_handed_off(&self) -> bool {
        matches!(*self.state.lock(), State::HandedOff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handoff(stream: &'static str) -> (Handoff<&'static str>, oneshot::Receiver<()>) {
        let (ack, ack_receiver) = Ack::channel();
        (Handoff { stream, ack, taken: None }, ack_receiver)
    }

    #[test]
    fn producer_first() {
        let slot = Slot::new();
        let (producer, _ack) = handoff("hello");

        assert!(matches!(slot.offer(producer), Ok(Offer::Parked)));
        let Ok(Claim::Taken(taken)) = slot.claim() else {
            panic!("consumer should take the parked stream");
        };
        assert_eq!(taken.stream, "hello");
        assert!(slot.is_handed_off());
    }

    #[test]
    fn consumer_first() {
        let slot = Slot::new();
        let Ok(Claim::Parked(mut receiver)) = slot.claim() else {
            panic!("consumer should park");
        };

        let (producer, _ack) = handoff("hello");
        assert!(matches!(slot.offer(producer), Ok(Offer::Delivered)));
        assert_eq!(receiver.try_recv().unwrap().stream, "hello");
        assert!(slot.is_handed_off());
    }

    #[test]
    fn same_role_conflicts() {
        let slot = Slot::new();
        let (first, _first_ack) = handoff("first");
        let (second, _second_ack) = handoff("second");

        assert!(matches!(slot.offer(first), Ok(Offer::Parked)));
        let Err((Refusal::Conflict, refused)) = slot.offer(second) else {
            panic!("second producer should conflict");
        };
        assert_eq!(refused.stream, "second");

        let consumers = Slot::<&'static str>::new();
        let Ok(Claim::Parked(_receiver)) = consumers.claim() else {
            panic!("consumer should park");
        };
        assert!(matches!(consumers.claim(), Err(Refusal::Conflict)));
    }

    #[test]
    fn arrival_after_handoff_conflicts() {
        let slot = Slot::new();
        let (producer, _ack) = handoff("hello");
        slot.offer(producer).ok().unwrap();
        let _taken = slot.claim().ok().unwrap();

        let (late, _late_ack) = handoff("late");
        assert!(matches!(slot.offer(late), Err((Refusal::Conflict, _))));
        assert!(matches!(slot.claim(), Err(Refusal::Conflict)));
    }

    #[test]
    fn gone_waiters_are_replaced() {
        let slot = Slot::new();
        let (gone, gone_ack) = handoff("gone");
        slot.offer(gone).ok().unwrap();
        drop(gone_ack);

        let (fresh, _fresh_ack) = handoff("fresh");
        assert!(matches!(slot.offer(fresh), Ok(Offer::Parked)));
        assert_eq!(slot.reclaim(), Some("fresh"));

        let slot = Slot::<&'static str>::new();
        let Ok(Claim::Parked(receiver)) = slot.claim() else {
            panic!("consumer should park");
        };
        drop(receiver);
        assert!(matches!(slot.claim(), Ok(Claim::Parked(_))));
    }

    #[test]
    fn producer_gone_consumer_waits() {
        let slot = Slot::new();
        let Ok(Claim::Parked(receiver)) = slot.claim() else {
            panic!("consumer should park");
        };
        drop(receiver);

        let (producer, _ack) = handoff("hello");
        assert!(matches!(slot.offer(producer), Ok(Offer::Parked)));
    }

    #[test]
    fn reclaim_only_while_parked() {
        let slot = Slot::new();
        let (producer, _ack) = handoff("hello");
        slot.offer(producer).ok().unwrap();
        let _taken = slot.claim().ok().unwrap();

        assert_eq!(slot.reclaim(), None);
        assert!(slot.is_handed_off());
    }

    #[test]
    fn withdraw_races_handoff() {
        let slot = Slot::new();
        let Ok(Claim::Parked(mut receiver)) = slot.claim() else {
            panic!("consumer should park");
        };
        let (producer, _ack) = handoff("hello");
        slot.offer(producer).ok().unwrap();

        // cancelled at the same moment: the handoff wins
        assert_eq!(slot.withdraw(&mut receiver).ok().map(|handoff| handoff.stream), Some("hello"));

        let slot = Slot::<&'static str>::new();
        let Ok(Claim::Parked(mut receiver)) = slot.claim() else {
            panic!("consumer should park");
        };
        assert!(matches!(slot.withdraw(&mut receiver), Err(PipeError::PeerTimeout)));
        assert!(slot.is_aborted());
    }

    #[test]
    fn aborted_slot_refuses() {
        let slot = Slot::new();
        let (producer, _ack) = handoff("hello");
        slot.offer(producer).ok().unwrap();
        slot.abandon(Role::Consumer);
        assert!(!slot.is_aborted());
        slot.abandon(Role::Producer);
        assert!(slot.is_aborted());

        let (late, _late_ack) = handoff("late");
        assert!(matches!(slot.offer(late), Err((Refusal::Aborted, _))));
        assert!(matches!(slot.claim(), Err(Refusal::Aborted)));
    }

    #[test]
    fn taken_fires_on_handoff() {
        let slot = Slot::new();
        let (ack, _ack_receiver) = Ack::channel();
        let (taken, mut taken_receiver) = oneshot::channel();
        slot.offer(Handoff { stream: "hello", ack, taken: Some(taken) }).ok().unwrap();
        assert!(taken_receiver.try_recv().is_err());

        let _taken = slot.claim().ok().unwrap();
        assert!(taken_receiver.try_recv().is_ok());
    }

    #[test]
    fn acknowledge_after_producer_left() {
        let (ack, receiver) = Ack::channel();
        drop(receiver);
        assert!(ack.is_closed());
        assert_eq!(ack.acknowledge(), Err(PipeError::AckTimeout));
    }
}
