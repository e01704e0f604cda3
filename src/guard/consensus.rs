//! Multi-party consensus over high-impact executions.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// One voter's recorded position
#[derive(Debug, Clone, Serialize)]
pub struct Vote {
    pub approved: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A pending or settled proposal, keyed by execution id.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusProposal {
    pub execution_id: Uuid,
    pub proposal: String,
    pub participants: Vec<String>,
    pub votes: HashMap<String, Vote>,
    pub required_votes: usize,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Evaluation of a proposal at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusOutcome {
    pub reached: bool,
    pub approved: bool,
    pub votes_cast: usize,
    pub approvals: usize,
    pub required_votes: usize,
    pub details: String,
}

impl ConsensusProposal {
    pub fn new(
        execution_id: Uuid,
        proposal: impl Into<String>,
        participants: Vec<String>,
        quorum_fraction: f64,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let required_votes = required_votes(participants.len(), quorum_fraction);
        Self {
            execution_id,
            proposal: proposal.into(),
            participants,
            votes: HashMap::new(),
            required_votes,
            deadline: now + timeout,
            created_at: now,
        }
    }

    /// Record (or overwrite) one voter's position. Returns false when the
    /// deadline has passed; late votes are never counted.
    pub fn submit_vote(
        &mut self,
        voter_id: impl Into<String>,
        approved: bool,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if now > self.deadline {
            debug!(
                "Rejecting late vote on {} ({}s past deadline)",
                self.execution_id,
                (now - self.deadline).num_seconds()
            );
            return false;
        }
        self.votes.insert(
            voter_id.into(),
            Vote {
                approved,
                reason: reason.into(),
                timestamp: now,
            },
        );
        true
    }

    /// Quorum evaluation: not reached until total votes meet the
    /// requirement; once reached, approved iff approving votes meet it.
    pub fn outcome(&self) -> ConsensusOutcome {
        let votes_cast = self.votes.len();
        let approvals = self.votes.values().filter(|v| v.approved).count();
        let reached = votes_cast >= self.required_votes;
        let approved = reached && approvals >= self.required_votes;

        let details = if !reached {
            format!(
                "{}/{} votes cast, quorum not reached",
                votes_cast, self.required_votes
            )
        } else if approved {
            format!(
                "approved with {}/{} approving votes",
                approvals, self.required_votes
            )
        } else {
            format!(
                "rejected: {} approvals of {} required ({} votes cast)",
                approvals, self.required_votes, votes_cast
            )
        };

        ConsensusOutcome {
            reached,
            approved,
            votes_cast,
            approvals,
            required_votes: self.required_votes,
            details,
        }
    }
}

/// Nearest-integer quorum: a 0.67 fraction over three participants asks
/// for two votes, matching the two-thirds reading rather than the float
/// artifact of ceil(3 × 0.67).
fn required_votes(participants: usize, quorum_fraction: f64) -> usize {
    if participants == 0 {
        return 0;
    }
    ((participants as f64 * quorum_fraction).round() as usize).clamp(1, participants)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(participants: &[&str], quorum: f64) -> ConsensusProposal {
        ConsensusProposal::new(
            Uuid::new_v4(),
            "open leveraged position",
            participants.iter().map(|s| s.to_string()).collect(),
            quorum,
            Duration::seconds(30),
            Utc::now(),
        )
    }

    #[test]
    fn quorum_of_three_at_two_thirds_needs_two() {
        assert_eq!(required_votes(3, 0.67), 2);
        assert_eq!(required_votes(2, 0.5), 1);
        assert_eq!(required_votes(5, 1.0), 5);
        assert_eq!(required_votes(0, 0.67), 0);
    }

    #[test]
    fn two_approvals_approve() {
        let mut p = proposal(&["a", "b", "c"], 0.67);
        let now = Utc::now();
        p.submit_vote("a", true, "fine", now);
        assert!(!p.outcome().reached);

        p.submit_vote("b", true, "fine", now);
        let outcome = p.outcome();
        assert!(outcome.reached);
        assert!(outcome.approved);
    }

    #[test]
    fn two_rejections_reject_without_third_vote() {
        let mut p = proposal(&["a", "b", "c"], 0.67);
        let now = Utc::now();
        p.submit_vote("a", false, "too risky", now);
        p.submit_vote("b", false, "too risky", now);

        let outcome = p.outcome();
        assert!(outcome.reached);
        assert!(!outcome.approved);
    }

    #[test]
    fn late_votes_are_rejected() {
        let mut p = proposal(&["a", "b", "c"], 0.67);
        let late = p.deadline + Duration::seconds(1);
        assert!(!p.submit_vote("a", true, "too late", late));
        assert_eq!(p.outcome().votes_cast, 0);
    }

    #[test]
    fn revote_overwrites() {
        let mut p = proposal(&["a", "b"], 1.0);
        let now = Utc::now();
        p.submit_vote("a", false, "initial doubt", now);
        p.submit_vote("a", true, "changed mind", now);

        assert_eq!(p.outcome().votes_cast, 1);
        assert_eq!(p.outcome().approvals, 1);
    }
}
