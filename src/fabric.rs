//! # Partition Fabric
//!
//! In-memory message passing between partition workers of one pass.
//!
//! ```text
//!   P0 ──┐            ┌──▶ inbox(P0)
//!   P1 ──┼─ envelope ─┼──▶ inbox(P1)      envelope = (from, phase, round, payload)
//!   P2 ──┘            └──▶ inbox(P2)
//! ```
//!
//! Every collective call ([`Endpoint::exchange`], [`Endpoint::all_reduce_any`])
//! blocks until one envelope for the same `(phase, round)` has arrived from
//! each expected peer, so the call boundary acts as a barrier. Envelopes from
//! a faster peer's next phase are parked until asked for.
//!
//! A worker that fails broadcasts an abort; any peer blocked in a collective
//! returns [`FloodError::PeerAborted`]. Dropping an endpoint without calling
//! [`Endpoint::finish`] (e.g. on panic) also aborts.

use crate::error::{FloodError, Result};
use crate::model::{EntityId, PartitionId};
use crate::reconcile::BoundaryLabel;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Collective step an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Handshake,
    Labels,
    Vote,
}

/// Content of one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Entities the sender believes it shares with the receiver, with the
    /// owner it records for each.
    Shared(Vec<(EntityId, PartitionId)>),
    /// Boundary announcements for one reconciliation round.
    Labels(Vec<BoundaryLabel>),
    /// Whether the sender changed anything this round.
    Vote(bool),
}

#[derive(Debug, Clone)]
struct Envelope {
    from: PartitionId,
    phase: Phase,
    round: u32,
    payload: Payload,
}

#[derive(Debug, Clone)]
enum Wire {
    Message(Envelope),
    Abort { from: PartitionId, reason: String },
}

/// Builder for a fully connected set of endpoints.
pub struct Fabric;

impl Fabric {
    /// One endpoint per partition; endpoint `i` belongs to `PartitionId(i)`.
    pub fn connect(parts: usize) -> Vec<Endpoint> {
        let (senders, receivers): (Vec<Sender<Wire>>, Vec<Receiver<Wire>>) =
            (0..parts).map(|_| unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(index, inbox)| Endpoint {
                id: PartitionId(index as u32),
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != index).then(|| tx.clone()))
                    .collect(),
                inbox,
                parked: Vec::new(),
                finished: false,
            })
            .collect()
    }
}

/// One partition's connection to every other partition.
pub struct Endpoint {
    id: PartitionId,
    /// Sender per partition; `None` at our own index.
    peers: Vec<Option<Sender<Wire>>>,
    inbox: Receiver<Wire>,
    parked: Vec<Envelope>,
    finished: bool,
}

impl Endpoint {
    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn partition_count(&self) -> usize {
        self.peers.len()
    }

    /// Every partition except this one.
    pub fn others(&self) -> BTreeSet<PartitionId> {
        (0..self.peers.len() as u32)
            .map(PartitionId)
            .filter(|p| *p != self.id)
            .collect()
    }

    /// Send `outgoing` and collect one payload from each partition in `expect`.
    pub fn exchange(
        &mut self,
        phase: Phase,
        round: u32,
        outgoing: BTreeMap<PartitionId, Payload>,
        expect: &BTreeSet<PartitionId>,
    ) -> Result<BTreeMap<PartitionId, Payload>> {
        for (to, payload) in outgoing {
            self.send(
                to,
                Envelope {
                    from: self.id,
                    phase,
                    round,
                    payload,
                },
            )?;
        }
        self.collect(phase, round, expect)
    }

    /// OR-reduce `flag` over all partitions.
    pub fn all_reduce_any(&mut self, round: u32, flag: bool) -> Result<bool> {
        let others = self.others();
        let outgoing = others
            .iter()
            .map(|peer| (*peer, Payload::Vote(flag)))
            .collect();
        let votes = self.exchange(Phase::Vote, round, outgoing, &others)?;

        let mut any = flag;
        for (peer, payload) in votes {
            match payload {
                Payload::Vote(vote) => any |= vote,
                other => {
                    return Err(FloodError::Communication {
                        partition: self.id,
                        message: format!("expected vote from {peer}, got {other:?}"),
                    })
                }
            }
        }
        Ok(any)
    }

    /// Tell every peer this pass is over. Idempotent.
    pub fn abort(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!(partition = %self.id, reason, "broadcasting abort");
        for tx in self.peers.iter().flatten() {
            // Peers that already exited have dropped their inbox.
            let _ = tx.send(Wire::Abort {
                from: self.id,
                reason: reason.to_string(),
            });
        }
    }

    /// Mark a clean exit so dropping the endpoint does not abort peers.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    fn send(&self, to: PartitionId, envelope: Envelope) -> Result<()> {
        let tx = self
            .peers
            .get(to.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| FloodError::Communication {
                partition: self.id,
                message: format!("no route to {to}"),
            })?;
        tx.send(Wire::Message(envelope))
            .map_err(|_| FloodError::Communication {
                partition: self.id,
                message: format!("{to} hung up"),
            })
    }

    fn collect(
        &mut self,
        phase: Phase,
        round: u32,
        expect: &BTreeSet<PartitionId>,
    ) -> Result<BTreeMap<PartitionId, Payload>> {
        let mut received = BTreeMap::new();

        let parked = std::mem::take(&mut self.parked);
        for envelope in parked {
            if envelope.phase == phase && envelope.round == round {
                self.accept(envelope, expect, &mut received)?;
            } else {
                self.parked.push(envelope);
            }
        }

        while received.len() < expect.len() {
            match self.inbox.recv() {
                Ok(Wire::Message(envelope)) => {
                    if envelope.phase == phase && envelope.round == round {
                        self.accept(envelope, expect, &mut received)?;
                    } else {
                        self.parked.push(envelope);
                    }
                }
                Ok(Wire::Abort { from, reason }) => {
                    self.finished = true;
                    return Err(FloodError::PeerAborted {
                        partition: self.id,
                        peer: from,
                        reason,
                    });
                }
                Err(_) => {
                    return Err(FloodError::Communication {
                        partition: self.id,
                        message: format!("inbox closed during {phase:?} round {round}"),
                    })
                }
            }
        }
        Ok(received)
    }

    fn accept(
        &self,
        envelope: Envelope,
        expect: &BTreeSet<PartitionId>,
        received: &mut BTreeMap<PartitionId, Payload>,
    ) -> Result<()> {
        if !expect.contains(&envelope.from) {
            return Err(FloodError::Consistency {
                partition: self.id,
                peer: envelope.from,
                message: format!(
                    "unexpected {:?} message in round {} from a non-neighbour",
                    envelope.phase, envelope.round
                ),
            });
        }
        if received.insert(envelope.from, envelope.payload).is_some() {
            return Err(FloodError::Communication {
                partition: self.id,
                message: format!("duplicate {:?} message from {}", envelope.phase, envelope.from),
            });
        }
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if !self.finished {
            self.abort("partition worker exited without completing the pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_reduce_sees_every_vote() {
        let endpoints = Fabric::connect(3);
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|mut endpoint| {
                    scope.spawn(move || {
                        let flag = endpoint.id() == PartitionId(2);
                        let any = endpoint.all_reduce_any(0, flag).unwrap();
                        endpoint.finish();
                        any
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![true, true, true]);
    }

    #[test]
    fn early_envelopes_are_parked() {
        let mut endpoints = Fabric::connect(2);
        let mut second = endpoints.pop().unwrap();
        let mut first = endpoints.pop().unwrap();

        // P1's round 1 envelope overtakes its round 0 envelope.
        second
            .send(
                PartitionId(0),
                Envelope {
                    from: PartitionId(1),
                    phase: Phase::Labels,
                    round: 1,
                    payload: Payload::Labels(Vec::new()),
                },
            )
            .unwrap();
        second
            .send(
                PartitionId(0),
                Envelope {
                    from: PartitionId(1),
                    phase: Phase::Labels,
                    round: 0,
                    payload: Payload::Shared(vec![(EntityId(4), PartitionId(1))]),
                },
            )
            .unwrap();

        let only_second = BTreeSet::from([PartitionId(1)]);
        let round0 = first
            .exchange(Phase::Labels, 0, BTreeMap::new(), &only_second)
            .unwrap();
        assert_eq!(
            round0[&PartitionId(1)],
            Payload::Shared(vec![(EntityId(4), PartitionId(1))])
        );
        let round1 = first
            .exchange(Phase::Labels, 1, BTreeMap::new(), &only_second)
            .unwrap();
        assert_eq!(round1[&PartitionId(1)], Payload::Labels(Vec::new()));

        first.finish();
        second.finish();
    }

    #[test]
    fn abort_unblocks_waiting_peer() {
        let mut endpoints = Fabric::connect(2);
        let second = endpoints.pop().unwrap();
        let mut first = endpoints.pop().unwrap();

        // Dropping an unfinished endpoint broadcasts an abort.
        drop(second);
        let err = first.all_reduce_any(0, false).unwrap_err();
        assert!(matches!(
            err,
            FloodError::PeerAborted { peer: PartitionId(1), .. }
        ));
    }

    #[test]
    fn message_from_non_neighbour_is_inconsistent() {
        let mut endpoints = Fabric::connect(3);
        let mut third = endpoints.pop().unwrap();
        let mut second = endpoints.pop().unwrap();
        let mut first = endpoints.pop().unwrap();

        third
            .send(
                PartitionId(0),
                Envelope {
                    from: PartitionId(2),
                    phase: Phase::Labels,
                    round: 0,
                    payload: Payload::Labels(Vec::new()),
                },
            )
            .unwrap();
        let expect = BTreeSet::from([PartitionId(1)]);
        let err = first
            .exchange(Phase::Labels, 0, BTreeMap::new(), &expect)
            .unwrap_err();
        assert!(matches!(err, FloodError::Consistency { peer: PartitionId(2), .. }));

        first.finish();
        second.finish();
        third.finish();
    }
}
