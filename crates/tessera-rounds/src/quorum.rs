//! Quorum arithmetic shared by every collection round.

use std::collections::{BTreeMap, HashMap};

use crate::error::RoundError;

/// Smallest number of matching votes that concludes a round with
/// `nb_participants` voters, i.e. `ceil((2n + 1) / 3)`.
pub fn consensus_threshold(nb_participants: usize) -> usize {
    (2 * nb_participants + 3) / 3
}

/// Accept an explicitly configured threshold if it lies between the
/// default threshold and the number of participants.
pub fn validate_threshold(threshold: usize, nb_participants: usize) -> Result<usize, RoundError> {
    let floor = consensus_threshold(nb_participants);
    if threshold < floor || threshold > nb_participants {
        return Err(RoundError::internal(format!(
            "consensus threshold ({}) must be between {} and {}",
            threshold, floor, nb_participants
        )));
    }
    Ok(threshold)
}

/// Number of votes of the most voted value
pub fn largest_vote_count<V: std::hash::Hash + Eq>(votes: impl IntoIterator<Item = V>) -> usize {
    let mut counter: HashMap<V, usize> = HashMap::new();
    for vote in votes {
        *counter.entry(vote).or_default() += 1;
    }
    counter.into_values().max().unwrap_or(0)
}

/// Fail with [`RoundError::MajorityImpossible`] when no value can reach
/// `threshold` anymore, even if every remaining participant votes for the
/// current leader.
pub fn check_majority_possible(
    votes_by_participant: &BTreeMap<String, String>,
    nb_participants: usize,
    threshold: usize,
) -> Result<(), RoundError> {
    if nb_participants == 0 || votes_by_participant.len() > nb_participants {
        return Err(RoundError::internal(
            "nb_participants not consistent with votes_by_participants",
        ));
    }
    if votes_by_participant.is_empty() {
        return Ok(());
    }

    let largest = largest_vote_count(votes_by_participant.values());
    let remaining = nb_participants - votes_by_participant.len();
    if remaining + largest < threshold {
        return Err(RoundError::MajorityImpossible(format!(
            "cannot reach quorum={}, number of remaining votes={}, number of most voted item's votes={}",
            threshold, remaining, largest
        )));
    }
    Ok(())
}

pub fn is_majority_possible(
    votes_by_participant: &BTreeMap<String, String>,
    nb_participants: usize,
    threshold: usize,
) -> bool {
    check_majority_possible(votes_by_participant, nb_participants, threshold).is_ok()
}

/// Same as [`check_majority_possible`], counting `new_voter`'s vote too
pub fn check_majority_possible_with_new_voter(
    votes_by_participant: &BTreeMap<String, String>,
    new_voter: &str,
    new_vote: &str,
    nb_participants: usize,
    threshold: usize,
) -> Result<(), RoundError> {
    if votes_by_participant.contains_key(new_voter) {
        return Err(RoundError::internal("voter has already voted"));
    }
    if votes_by_participant.len() + 1 > nb_participants {
        return Err(RoundError::internal(
            "nb_participants not consistent with votes_by_participants",
        ));
    }
    let mut votes = votes_by_participant.clone();
    votes.insert(new_voter.to_string(), new_vote.to_string());
    check_majority_possible(&votes, nb_participants, threshold)
}
