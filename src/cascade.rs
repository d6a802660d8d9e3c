//! Ordered "try ranked candidates until one validates" resolution.
//!
//! A [`Cascade`] owns an ordered list of [`CandidateStrategy`] tiers. Seeds are
//! tried first, then each strategy's output in declared order. Candidates are
//! deduplicated by exact key across all tiers, excluded keys are never tried,
//! and the first candidate whose fetched artifact validates wins. Strategy
//! tiers are only expanded once every earlier candidate has failed, so a
//! successful seed never triggers page scraping or searching. The try-order is
//! the same as the eager [`Cascade::plan`].

use std::collections::HashSet;

use log::{debug, info};

use crate::http_client::FetchError;

/// Identity used to deduplicate candidates.
pub trait CandidateKey {
    fn key(&self) -> &str;
}

impl CandidateKey for String {
    fn key(&self) -> &str {
        self.as_str()
    }
}

/// Produces candidates for one tier of the cascade.
pub trait CandidateStrategy<S, C>: Send + Sync {
    fn name(&self) -> &'static str;
    fn candidates(&self, subject: &S, seeds: &[C]) -> Vec<C>;
}

/// Order-preserving, deduplicating candidate accumulator.
#[derive(Debug)]
pub struct CandidateList<C> {
    ordered: Vec<C>,
    seen: HashSet<String>,
}

impl<C: CandidateKey> CandidateList<C> {
    pub fn new(excluded: &[String]) -> Self {
        Self {
            ordered: Vec::new(),
            seen: excluded
                .iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }

    /// Appends `candidate` unless it is blank, excluded or already present.
    pub fn push(&mut self, candidate: C) -> bool {
        let key = candidate.key().trim();
        if key.is_empty() || !self.seen.insert(key.to_string()) {
            return false;
        }
        self.ordered.push(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn get(&self, index: usize) -> Option<&C> {
        self.ordered.get(index)
    }

    pub fn into_vec(self) -> Vec<C> {
        self.ordered
    }
}

/// Winning candidate with its validated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<C, T> {
    pub candidate: C,
    pub artifact: T,
    /// Number of candidates fetched, including the winner.
    pub tried: usize,
}

pub struct Cascade<S, C> {
    label: &'static str,
    strategies: Vec<Box<dyn CandidateStrategy<S, C>>>,
}

impl<S, C> Cascade<S, C>
where
    C: CandidateKey + Clone,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            strategies: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl CandidateStrategy<S, C> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    /// Full ordered candidate list, expanding every tier up front.
    #[cfg(test)]
    pub fn plan(&self, subject: &S, seeds: &[C], excluded: &[String]) -> Vec<C> {
        let mut list = CandidateList::new(excluded);
        for seed in seeds {
            list.push(seed.clone());
        }
        for strategy in &self.strategies {
            for candidate in strategy.candidates(subject, seeds) {
                list.push(candidate);
            }
        }
        list.into_vec()
    }

    /// Tries candidates strictly in order and returns the first that validates.
    ///
    /// Fetch errors and rejected artifacts are candidate failures; exhausting
    /// the list yields `None`, never an error.
    pub fn resolve<T, F, V>(
        &self,
        subject: &S,
        seeds: &[C],
        excluded: &[String],
        mut fetch: F,
        validate: V,
    ) -> Option<Resolution<C, T>>
    where
        F: FnMut(&C) -> Result<T, FetchError>,
        V: Fn(&T) -> bool,
    {
        let mut list = CandidateList::new(excluded);
        let mut next_index = 0usize;
        let mut tiers = std::iter::once(None).chain(self.strategies.iter().map(Some));

        loop {
            while let Some(candidate) = list.get(next_index).cloned() {
                next_index += 1;
                match fetch(&candidate) {
                    Ok(artifact) if validate(&artifact) => {
                        debug!(
                            "{}: accepted candidate #{} {}",
                            self.label,
                            next_index,
                            candidate.key()
                        );
                        return Some(Resolution {
                            candidate,
                            artifact,
                            tried: next_index,
                        });
                    }
                    Ok(_) => debug!("{}: rejected candidate {}", self.label, candidate.key()),
                    Err(error) => {
                        debug!("{}: candidate {} failed: {}", self.label, candidate.key(), error)
                    }
                }
            }

            match tiers.next() {
                Some(None) => {
                    for seed in seeds {
                        list.push(seed.clone());
                    }
                }
                Some(Some(strategy)) => {
                    let added = strategy
                        .candidates(subject, seeds)
                        .into_iter()
                        .filter(|candidate| list.push(candidate.clone()))
                        .count();
                    debug!("{}: strategy {} added {} candidates", self.label, strategy.name(), added);
                }
                None => break,
            }
        }

        info!(
            "{}: no candidate validated after {} attempts",
            self.label,
            list.len()
        );
        None
    }
}
