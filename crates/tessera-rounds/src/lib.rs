//! Tessera Rounds - Round state machine and block lifecycle
//!
//! This crate provides the rounds that collect agent payloads, the
//! application FSM that moves between them on events and timeouts, the
//! background apps running alongside it, offence tracking, and the round
//! sequence that feeds all of this from consensus engine blocks.

pub mod abci_app;
pub mod background;
pub mod blockchain;
pub mod error;
pub mod offence;
pub mod quorum;
pub mod registry;
pub mod round;
pub mod round_sequence;
pub mod synchronized;
pub mod timeouts;

pub use abci_app::{AbciApp, AppDefinition, TransitionTable};
pub use background::{BackgroundApp, BackgroundKind};
pub use blockchain::{Block, BlockBuilder, Blockchain};
pub use error::RoundError;
pub use offence::{AppOffences, AvailabilityWindow, OffenceStatus, OffenceTracker};
pub use registry::{RoundFactory, RoundRegistry};
pub use round::{
    check_payload_kind, CollectionRound, CollectionRule, DegenerateRound, Event, Round, RoundId,
    RoundOutcome, RoundSpec, Selection,
};
pub use round_sequence::{BlockPhase, RoundSequence, SequenceConfig, SequenceStatus};
pub use synchronized::SynchronizedData;
pub use timeouts::Timeouts;
