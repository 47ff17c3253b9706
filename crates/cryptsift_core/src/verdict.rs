use std::fmt;

use serde::Serialize;

use crate::statistics::{SkippedTest, TestResult, TestVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Encrypted,
    NotEncrypted,
    Inconclusive,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Encrypted => "encrypted",
            Classification::NotEncrypted => "not encrypted",
            Classification::Inconclusive => "inconclusive",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub encrypted: usize,
    pub not_encrypted: usize,
}

impl VoteTally {
    #[inline]
    pub fn total(&self) -> usize {
        self.encrypted + self.not_encrypted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationVerdict {
    pub classification: Classification,
    pub tally: VoteTally,
    pub signature_override: bool,
    pub results: Vec<TestResult>,
    pub skipped: Vec<SkippedTest>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictAggregator;

impl VerdictAggregator {
    pub fn aggregate(
        &self,
        results: Vec<TestResult>,
        skipped: Vec<SkippedTest>,
    ) -> ClassificationVerdict {
        let mut tally = VoteTally::default();
        let mut signature_override = false;

        for result in &results {
            match result.verdict {
                TestVerdict::Vote(true) => tally.encrypted += 1,
                TestVerdict::Vote(false) => tally.not_encrypted += 1,
                TestVerdict::Override => signature_override = true,
                TestVerdict::Abstain => {}
            }
        }

        // A tie is not a majority.
        let classification = if signature_override {
            Classification::NotEncrypted
        } else if tally.total() == 0 {
            Classification::Inconclusive
        } else if tally.encrypted > tally.not_encrypted {
            Classification::Encrypted
        } else {
            Classification::NotEncrypted
        };

        ClassificationVerdict {
            classification,
            tally,
            signature_override,
            results,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::TestKind;

    fn vote(kind: TestKind, encrypted: bool) -> TestResult {
        TestResult::new(kind, 0.0, TestVerdict::Vote(encrypted))
    }

    #[test]
    fn test_majority_wins() {
        let verdict = VerdictAggregator.aggregate(
            vec![
                vote(TestKind::Entropy, true),
                vote(TestKind::ChiSquare, true),
                vote(TestKind::KolmogorovSmirnov, false),
            ],
            Vec::new(),
        );
        assert_eq!(verdict.classification, Classification::Encrypted);
        assert_eq!(verdict.tally, VoteTally { encrypted: 2, not_encrypted: 1 });
    }

    #[test]
    fn test_tie_is_not_encrypted() {
        let verdict = VerdictAggregator.aggregate(
            vec![vote(TestKind::Entropy, true), vote(TestKind::ChiSquare, false)],
            Vec::new(),
        );
        assert_eq!(verdict.classification, Classification::NotEncrypted);
    }

    #[test]
    fn test_signature_overrides_unanimous_votes() {
        let mut results: Vec<TestResult> = [
            TestKind::Entropy,
            TestKind::ChiSquare,
            TestKind::KolmogorovSmirnov,
            TestKind::Compression,
            TestKind::Autocorrelation,
        ]
        .into_iter()
        .map(|kind| vote(kind, true))
        .collect();
        results.push(TestResult::new(TestKind::Signatures, 1.0, TestVerdict::Override));

        let verdict = VerdictAggregator.aggregate(results, Vec::new());
        assert_eq!(verdict.classification, Classification::NotEncrypted);
        assert!(verdict.signature_override);
        assert_eq!(verdict.tally.encrypted, 5);
    }

    #[test]
    fn test_no_votes_is_inconclusive() {
        let verdict = VerdictAggregator.aggregate(
            vec![TestResult::new(TestKind::Signatures, 0.0, TestVerdict::Abstain)],
            vec![SkippedTest {
                kind: TestKind::Entropy,
                reason: "empty".into(),
            }],
        );
        assert_eq!(verdict.classification, Classification::Inconclusive);
        assert_eq!(verdict.skipped.len(), 1);

        let empty = VerdictAggregator.aggregate(Vec::new(), Vec::new());
        assert_eq!(empty.classification, Classification::Inconclusive);
    }
}
