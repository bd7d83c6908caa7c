use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cell::Moment;
use crate::error::{Result, TreeError};

use super::essential::{EssentialNode, EssentialParticle};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message<M> {
    Gravity(Vec<EssentialNode<M>>),
    /// Largest particle radius on the sender. Opens a collision round.
    Reach(f64),
    Collisions(Vec<EssentialParticle>),
}

impl<M> Message<M> {
    pub fn label(&self) -> &'static str {
        match self {
            Message::Gravity(_) => "gravity",
            Message::Reach(_) => "reach",
            Message::Collisions(_) => "collisions",
        }
    }
}

/// Point-to-point messaging between ranks. Delivery must be reliable and
/// ordered per sender/receiver pair; retries are the implementation's business.
pub trait Transport<M> {
    fn rank(&self) -> usize;
    fn n_ranks(&self) -> usize;
    fn send(&mut self, to: usize, message: Message<M>) -> Result<()>;
    /// Blocks until a message from `from` arrives.
    fn recv(&mut self, from: usize) -> Result<Message<M>>;
}

/// In-process transport: one channel per ordered pair of ranks, carrying
/// JSON-encoded messages.
pub struct ChannelTransport {
    rank: usize,
    n_ranks: usize,
    senders: Vec<Option<Sender<Vec<u8>>>>,
    receivers: Vec<Option<Receiver<Vec<u8>>>>,
}

impl ChannelTransport {
    /// Endpoints for `n_ranks` ranks, indexed by rank.
    pub fn network(n_ranks: usize) -> Vec<ChannelTransport> {
        let mut endpoints: Vec<ChannelTransport> = (0..n_ranks)
            .map(|rank| ChannelTransport {
                rank,
                n_ranks,
                senders: (0..n_ranks).map(|_| None).collect(),
                receivers: (0..n_ranks).map(|_| None).collect(),
            })
            .collect();

        for from in 0..n_ranks {
            for to in 0..n_ranks {
                if from == to {
                    continue;
                }
                let (tx, rx) = unbounded();
                endpoints[from].senders[to] = Some(tx);
                endpoints[to].receivers[from] = Some(rx);
            }
        }
        endpoints
    }
}

impl<M: Moment> Transport<M> for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn send(&mut self, to: usize, message: Message<M>) -> Result<()> {
        let sender = self
            .senders
            .get(to)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                TreeError::Transport(format!("rank {} has no link to {to}", self.rank))
            })?;
        let bytes = serde_json::to_vec(&message).map_err(|e| TreeError::Transport(e.to_string()))?;
        sender.send(bytes).map_err(|_| {
            error!(from = self.rank, to, "peer hung up");
            TreeError::Transport(format!("rank {to} is no longer listening"))
        })
    }

    fn recv(&mut self, from: usize) -> Result<Message<M>> {
        let receiver = self
            .receivers
            .get(from)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                TreeError::Transport(format!("rank {} has no link from {from}", self.rank))
            })?;
        let bytes = receiver.recv().map_err(|_| {
            error!(rank = self.rank, peer = from, "peer disconnected before sending");
            TreeError::IncompleteExchange { peer: from }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| TreeError::Transport(e.to_string()))
    }
}
