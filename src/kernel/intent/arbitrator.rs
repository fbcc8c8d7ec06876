use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::package::ResultPackage;
use super::registry::IntentRegistry;
use super::types::{clamp_confidence, IntentMatch, IntentName};
use crate::kernel::guard::catch_panic;

/// Candidates must score strictly above this to be accepted.
pub const ACCEPTANCE_THRESHOLD: f32 = 0.5;

/// Geometric mean of backend and handler confidence.
pub fn combine(backend: f32, handler: f32) -> f32 {
    (clamp_confidence(backend) * clamp_confidence(handler)).sqrt()
}

/// One candidate per intent name, keeping the highest backend confidence.
/// Output order is the order in which each name was first seen.
pub fn merge_candidates<I>(batches: I) -> Vec<IntentMatch>
where
    I: IntoIterator<Item = Vec<IntentMatch>>,
{
    let mut merged: Vec<IntentMatch> = Vec::new();
    let mut index: HashMap<IntentName, usize> = HashMap::new();

    for batch in batches {
        for mut candidate in batch {
            candidate.confidence = clamp_confidence(candidate.confidence);
            match index.get(&candidate.name) {
                Some(&i) => {
                    if candidate.confidence > merged[i].confidence {
                        merged[i] = candidate;
                    }
                }
                None => {
                    index.insert(candidate.name.clone(), merged.len());
                    merged.push(candidate);
                }
            }
        }
    }
    merged
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: IntentMatch,
    pub handler_confidence: f32,
    pub combined: f32,
}

/// Output of the ranking phase. `scored` is sorted best first; equal scores keep
/// merge order.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub query: String,
    pub scored: Vec<ScoredCandidate>,
    pub considered: usize,
    pub backend_failures: usize,
    pub handler_failures: usize,
}

impl Ranking {
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.scored.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Primary,
    Fallback,
    NoMatch,
}

#[derive(Debug)]
pub enum Resolution {
    Primary(ResultPackage),
    Fallback(ResultPackage),
    NoMatch,
}

impl Resolution {
    pub fn path(&self) -> ResolutionPath {
        match self {
            Resolution::Primary(_) => ResolutionPath::Primary,
            Resolution::Fallback(_) => ResolutionPath::Fallback,
            Resolution::NoMatch => ResolutionPath::NoMatch,
        }
    }

    /// The package to render. No match yields the no-answer package.
    pub fn into_package(self) -> ResultPackage {
        match self {
            Resolution::Primary(package) | Resolution::Fallback(package) => package,
            Resolution::NoMatch => ResultPackage::no_answer(),
        }
    }
}

#[derive(Debug)]
pub struct Verdict {
    pub resolution: Resolution,
    pub candidates: usize,
    pub handler_failures: usize,
}

/// Turns a query into exactly one result package.
///
/// Ranking asks every backend, merges by name, filters by [`ACCEPTANCE_THRESHOLD`]
/// and combines with handler confidence. Committing runs the best handler's result
/// step; a failing handler hands over to the next candidate, then to the fallback
/// chain, and finally to no-answer.
pub struct ConfidenceArbitrator {
    registry: Arc<IntentRegistry>,
}

impl ConfidenceArbitrator {
    pub fn new(registry: Arc<IntentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<IntentRegistry> {
        &self.registry
    }

    pub fn normalize(query: &str) -> String {
        query.trim().to_lowercase()
    }

    pub fn rank(&self, query: &str) -> Ranking {
        let query = Self::normalize(query);
        let mut ranking = Ranking {
            query: query.clone(),
            ..Ranking::default()
        };

        let mut batches = Vec::with_capacity(self.registry.backends().len());
        for backend in self.registry.backends() {
            let result = catch_panic(|| backend.matches(&query).map_err(anyhow::Error::from));
            match result {
                Ok(found) => batches.push(found),
                Err(e) => {
                    warn!("Backend '{}' failed on query: {}", backend.name(), e);
                    ranking.backend_failures += 1;
                }
            }
        }

        let merged = merge_candidates(batches);
        ranking.considered = merged.len();

        for candidate in merged {
            if candidate.confidence <= ACCEPTANCE_THRESHOLD {
                continue;
            }
            let Some(entry) = self.registry.entry(&candidate.name) else {
                debug!("No handler for matched intent {}", candidate.name);
                continue;
            };
            let handler_confidence = match entry.handler.confidence(&candidate) {
                Ok(confidence) => confidence,
                Err(e) => {
                    warn!("Confidence check for {} failed: {}", candidate.name, e);
                    ranking.handler_failures += 1;
                    0.0
                }
            };
            let combined = combine(candidate.confidence, handler_confidence);
            debug!(
                "{}: backend {:.3} handler {:.3} combined {:.3}",
                candidate.name, candidate.confidence, handler_confidence, combined
            );
            ranking.scored.push(ScoredCandidate {
                candidate,
                handler_confidence,
                combined,
            });
        }

        ranking
            .scored
            .sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(Ordering::Equal));
        ranking
    }

    pub fn commit(&self, ranking: Ranking) -> Verdict {
        let mut handler_failures = ranking.handler_failures;
        let candidates = ranking.considered;

        for scored in ranking.scored.iter().filter(|s| s.combined > ACCEPTANCE_THRESHOLD) {
            let Some(entry) = self.registry.entry(&scored.candidate.name) else {
                continue;
            };
            let mut package = ResultPackage::new(entry.name.clone());
            match entry.handler.result(&scored.candidate, &mut package) {
                Ok(()) => {
                    package.default_action(&entry.action);
                    package.confidence = scored.combined;
                    return Verdict {
                        resolution: Resolution::Primary(package),
                        candidates,
                        handler_failures,
                    };
                }
                Err(e) => {
                    warn!("Handler for {} failed: {}", entry.name, e);
                    handler_failures += 1;
                }
            }
        }

        if let Some(package) = self.run_fallbacks(&ranking.query, &mut handler_failures) {
            return Verdict {
                resolution: Resolution::Fallback(package),
                candidates,
                handler_failures,
            };
        }

        debug!("No intent accepted query '{}'", ranking.query);
        Verdict {
            resolution: Resolution::NoMatch,
            candidates,
            handler_failures,
        }
    }

    pub fn resolve(&self, query: &str) -> Verdict {
        let ranking = self.rank(query);
        self.commit(ranking)
    }

    fn run_fallbacks(&self, query: &str, failures: &mut usize) -> Option<ResultPackage> {
        let mut ranked = Vec::with_capacity(self.registry.fallbacks().len());
        for fallback in self.registry.fallbacks() {
            let candidate = IntentMatch::raw(fallback.name.clone(), query);
            match fallback.handler.confidence(&candidate) {
                Ok(confidence) if confidence > 0.0 => ranked.push((fallback, candidate, confidence)),
                Ok(_) => {}
                Err(e) => {
                    warn!("Fallback {} confidence failed: {}", fallback.name, e);
                    *failures += 1;
                }
            }
        }
        // Stable: on equal confidence the earliest registered fallback goes first.
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

        for (fallback, candidate, confidence) in ranked {
            let mut package = ResultPackage::new(fallback.name.clone());
            match fallback.handler.result(&candidate, &mut package) {
                Ok(()) => {
                    package.default_action(&fallback.name);
                    package.confidence = confidence;
                    return Some(package);
                }
                Err(e) => {
                    warn!("Fallback {} failed: {}", fallback.name, e);
                    *failures += 1;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(skill: &str, confidence: f32) -> IntentMatch {
        IntentMatch::new(IntentName::new(skill, "x"), confidence, "q")
    }

    #[test]
    fn test_combine_is_symmetric_geometric_mean() {
        assert!((combine(0.9, 0.4) - 0.6).abs() < 1e-6);
        assert_eq!(combine(0.9, 0.4), combine(0.4, 0.9));
        assert_eq!(combine(2.0, 1.0), 1.0);
        assert_eq!(combine(f32::NAN, 1.0), 0.0);
    }

    #[test]
    fn test_merge_keeps_max_in_first_seen_order() {
        let merged = merge_candidates(vec![
            vec![candidate("a", 0.3), candidate("b", 0.6)],
            vec![candidate("a", 0.9)],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name.skill, "a");
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(merged[1].name.skill, "b");
    }

    #[test]
    fn test_no_match_yields_no_answer_package() {
        let package = Resolution::NoMatch.into_package();
        assert!(package.is_no_answer());
    }
}
