// Explores sequences of version-map/exclusion-map updates with
// `stateright` and checks the two monotonicity properties §8 calls out:
// 1. A peer's recorded version never decreases.
// 2. Once a transaction ID is excluded, it stays excluded.
//
// Grounded on this workspace's `stateright` dev-dependency, used for
// exactly this kind of small, finite state-space check.

use std::collections::HashMap;
use std::sync::Arc;

use stateright::{Model, Property};

use drift_engine::{CanonicalPeer, CanonicalPeerRegistry, MaxVersionMap, PeerExclusionMap};
use drift_wire::{PeerId, TransactionId};

const PEERS: u64 = 2;
const TIDS: u64 = 3;
const MAX_HISTORY: usize = 4;

fn tid(t: u64) -> TransactionId {
    TransactionId { time: t, peer_hi: 0, peer_lo: 0 }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    Observe { peer: u64, t: u64 },
    Exclude { peer: u64, start: u64, end: u64 },
}

/// `(kind, peer, a, b)`: `kind` 0 is `Observe{peer, t: a}`, 1 is
/// `Exclude{peer, start: a, end: b}`. A plain tuple history (rather than
/// embedding the real map types, which don't derive `Hash`/`Eq`) is what
/// the checker hashes to detect already-visited states.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct State {
    history: Vec<(u8, u64, u64, u64)>,
}

struct SequencePointModel {
    peers: Vec<Arc<CanonicalPeer>>,
}

impl SequencePointModel {
    fn new() -> Self {
        let registry = Arc::new(CanonicalPeerRegistry::new());
        let peers = (0..PEERS).map(|i| registry.get(PeerId::new("peer", i as u16))).collect();
        SequencePointModel { peers }
    }

    fn replay(&self, history: &[(u8, u64, u64, u64)]) -> (MaxVersionMap, PeerExclusionMap) {
        let mut version_map = MaxVersionMap::new();
        let mut exclusion = PeerExclusionMap::new();
        for &(kind, peer_idx, a, b) in history {
            let peer = self.peers[peer_idx as usize].clone();
            if kind == 0 {
                version_map.add_peer_transaction_id(peer, tid(a));
            } else {
                exclusion.add_excluded_range(peer, tid(a), tid(b));
            }
        }
        (version_map, exclusion)
    }
}

impl Model for SequencePointModel {
    type State = State;
    type Action = Action;

    fn init_states(&self) -> Vec<Self::State> {
        vec![State { history: Vec::new() }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if state.history.len() >= MAX_HISTORY {
            return;
        }
        for peer in 0..PEERS {
            for t in 0..TIDS {
                actions.push(Action::Observe { peer, t });
            }
            for start in 0..TIDS {
                for end in (start + 1)..TIDS {
                    actions.push(Action::Exclude { peer, start, end });
                }
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut history = state.history.clone();
        match action {
            Action::Observe { peer, t } => history.push((0, peer, t, 0)),
            Action::Exclude { peer, start, end } => history.push((1, peer, start, end)),
        }
        Some(State { history })
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("version map entry equals the max transaction id ever observed for that peer", |model, state| {
                let (version_map, _) = model.replay(&state.history);
                let mut expected: HashMap<u64, TransactionId> = HashMap::new();
                for &(kind, peer_idx, a, _b) in &state.history {
                    if kind != 0 {
                        continue;
                    }
                    let slot = expected.entry(peer_idx).or_insert(TransactionId::MIN);
                    if tid(a) > *slot {
                        *slot = tid(a);
                    }
                }
                model.peers.iter().enumerate().all(|(idx, peer)| {
                    let want = expected.get(&(idx as u64)).copied().unwrap_or(TransactionId::MIN);
                    version_map.get(peer) == want
                })
            }),
            Property::always("once excluded, a transaction id stays excluded for the rest of the history", |model, state| {
                let (_, exclusion) = model.replay(&state.history);
                state.history.iter().all(|&(kind, peer_idx, start, end)| {
                    if kind != 1 {
                        return true;
                    }
                    let peer = &model.peers[peer_idx as usize];
                    (start..end).all(|t| exclusion.is_transaction_excluded(peer, tid(t)))
                })
            }),
        ]
    }
}

#[test]
fn sequence_point_monotonicity_holds_across_explored_histories() {
    let model = SequencePointModel::new();
    model.checker().spawn_dfs().join().assert_properties();
}
