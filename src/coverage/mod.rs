//! Reconciliation index: matches provider records against the canonical
//! catalog and answers coverage queries.
//!
//! Matching rules, in order:
//! 1. A record carrying a strong hash is looked up by hash; a hit attaches
//!    it with `hash-exact` confidence. A miss orphans the record - a wrong
//!    hash is never "rescued" by a name match, which keeps conflicting
//!    hashes out of coverage.
//! 2. A record without a usable hash is looked up by its
//!    (normalized name, region) key and attaches with `name-approximate`
//!    confidence.
//! 3. Everything else lands in the orphan list, visible for diagnostics.
//!
//! Re-importing a provider first removes every prior contribution of that
//! provider (attributions and orphans), so re-import is idempotent and a
//! provider's latest snapshot always wins wholesale.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::model::{
    CatalogEntry, EntryId, HashKey, Locator, MatchConfidence, ProviderId, ProviderRecord, Region,
    Transport,
};
use crate::provider::NormalizedListing;

/// Error type for coverage queries.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The entry id is not part of the loaded catalog.
    #[error("unknown catalog entry: {0}")]
    UnknownEntry(EntryId),
}

/// One provider record attached to a catalog entry.
#[derive(Debug, Clone)]
pub struct Attribution {
    /// The matched provider record.
    pub record: Arc<ProviderRecord>,
    /// How the match was made (`hash-exact` or `name-approximate`).
    pub confidence: MatchConfidence,
}

/// Derived coverage view for one catalog entry.
///
/// Rebuilt wholesale per provider import; never partially mutated.
#[derive(Debug, Clone)]
pub struct CoverageEntry {
    /// The catalog entry.
    pub entry: Arc<CatalogEntry>,
    /// Provider records matched to it.
    pub matches: Vec<Attribution>,
}

impl CoverageEntry {
    /// Returns the best confidence across all matches, or `Unmatched`.
    #[must_use]
    pub fn confidence(&self) -> MatchConfidence {
        if self
            .matches
            .iter()
            .any(|m| m.confidence == MatchConfidence::HashExact)
        {
            MatchConfidence::HashExact
        } else if self.matches.is_empty() {
            MatchConfidence::Unmatched
        } else {
            MatchConfidence::NameApproximate
        }
    }

    /// Returns the number of distinct providers contributing a match.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.matches
            .iter()
            .map(|m| &m.record.provider)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Returns the confidence a specific provider contributes, if any.
    #[must_use]
    pub fn provider_confidence(&self, provider: &ProviderId) -> Option<MatchConfidence> {
        self.matches
            .iter()
            .filter(|m| &m.record.provider == provider)
            .map(|m| m.confidence)
            .min_by_key(|c| match c {
                MatchConfidence::HashExact => 0,
                MatchConfidence::NameApproximate => 1,
                MatchConfidence::Unmatched => 2,
            })
    }
}

/// A downloadable candidate for one entry, used by enqueue source selection.
#[derive(Debug, Clone)]
pub struct LocatorCandidate {
    /// The provider offering the artifact.
    pub provider: ProviderId,
    /// The locator to fetch from.
    pub locator: Locator,
    /// Whether the provider's declared size agrees with the catalog entry.
    pub size_agrees: bool,
    /// Confidence of the underlying match.
    pub confidence: MatchConfidence,
}

/// Counters from one provider import, for visible logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportSummary {
    /// Records attached with `hash-exact` confidence.
    pub hash_matched: usize,
    /// Records attached with `name-approximate` confidence.
    pub name_matched: usize,
    /// Records retained as orphans.
    pub orphaned: usize,
    /// Raw records the normalizer already skipped.
    pub skipped: usize,
}

/// Coverage index for one console session.
///
/// Owns the immutable catalog and all per-provider attributions. Writers
/// (imports/removals) are serialized by the owner; readers get cloned
/// snapshots via the query methods.
#[derive(Debug)]
pub struct CoverageIndex {
    entries: Vec<Arc<CatalogEntry>>,
    by_id: HashMap<EntryId, usize>,
    by_hash: HashMap<HashKey, usize>,
    by_name: HashMap<(String, Region), usize>,
    attributions: HashMap<EntryId, Vec<Attribution>>,
    orphans: HashMap<ProviderId, Vec<Arc<ProviderRecord>>>,
    providers: BTreeSet<ProviderId>,
}

impl CoverageIndex {
    /// Builds the index from a loaded catalog.
    ///
    /// Hash and name lookups are built once here; membership checks during
    /// import are O(1). When two entries share a name key the first one
    /// keeps it (strong hashes disambiguate such collisions).
    #[must_use]
    #[instrument(skip(catalog), fields(entries = catalog.len()))]
    pub fn new(catalog: Vec<CatalogEntry>) -> Self {
        let entries: Vec<Arc<CatalogEntry>> = catalog.into_iter().map(Arc::new).collect();
        let mut by_id = HashMap::new();
        let mut by_hash = HashMap::new();
        let mut by_name = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            by_id.insert(entry.id.clone(), index);
            for key in entry.hashes.strong_keys() {
                by_hash.entry(key).or_insert(index);
            }
            if let Some(name_key) = entry.name_key() {
                by_name.entry(name_key).or_insert(index);
            }
        }

        debug!(
            entries = entries.len(),
            hash_keys = by_hash.len(),
            name_keys = by_name.len(),
            "built coverage index"
        );

        Self {
            entries,
            by_id,
            by_hash,
            by_name,
            attributions: HashMap::new(),
            orphans: HashMap::new(),
            providers: BTreeSet::new(),
        }
    }

    /// Imports (or re-imports) one provider's normalized listing.
    ///
    /// All prior contributions of the provider are removed first, so
    /// importing the same listing twice yields an identical coverage set.
    #[instrument(skip(self, listing), fields(provider = %listing.provider))]
    pub fn import_provider(&mut self, listing: NormalizedListing) -> ImportSummary {
        let provider = listing.provider.clone();
        self.retract_provider(&provider);
        self.providers.insert(provider.clone());

        let mut summary = ImportSummary {
            skipped: listing.skipped,
            ..ImportSummary::default()
        };

        for record in listing.records {
            let record = Arc::new(record);
            match self.match_record(&record) {
                Some((index, confidence)) => {
                    let entry_id = self.entries[index].id.clone();
                    self.attributions.entry(entry_id).or_default().push(Attribution {
                        record,
                        confidence,
                    });
                    match confidence {
                        MatchConfidence::HashExact => summary.hash_matched += 1,
                        _ => summary.name_matched += 1,
                    }
                }
                None => {
                    self.orphans.entry(provider.clone()).or_default().push(record);
                    summary.orphaned += 1;
                }
            }
        }

        info!(
            provider = %provider,
            hash_matched = summary.hash_matched,
            name_matched = summary.name_matched,
            orphaned = summary.orphaned,
            skipped = summary.skipped,
            "imported provider listing"
        );

        summary
    }

    /// Removes a provider and all of its contributions.
    #[instrument(skip(self))]
    pub fn remove_provider(&mut self, provider: &ProviderId) {
        self.retract_provider(provider);
        self.providers.remove(provider);
    }

    /// Returns the number of providers known to this console session.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns the catalog entries, in load order.
    #[must_use]
    pub fn entries(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    /// Looks up a catalog entry by id.
    #[must_use]
    pub fn entry(&self, id: &EntryId) -> Option<&Arc<CatalogEntry>> {
        self.by_id.get(id).map(|&index| &self.entries[index])
    }

    /// Returns the coverage view for one entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::UnknownEntry`] for ids outside the catalog.
    pub fn coverage(&self, id: &EntryId) -> Result<CoverageEntry, CoverageError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| CoverageError::UnknownEntry(id.clone()))?;
        Ok(CoverageEntry {
            entry: Arc::clone(entry),
            matches: self.attributions.get(id).cloned().unwrap_or_default(),
        })
    }

    /// Returns the coverage fraction for one entry.
    ///
    /// Distinct contributing providers divided by known providers; zero
    /// when no providers are known. Always within `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::UnknownEntry`] for ids outside the catalog.
    pub fn coverage_fraction(&self, id: &EntryId) -> Result<f64, CoverageError> {
        let coverage = self.coverage(id)?;
        if self.providers.is_empty() {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(coverage.provider_count() as f64 / self.providers.len() as f64)
    }

    /// Suggests download candidates for one entry, best first.
    ///
    /// Direct HTTP locators whose provider size agrees with the catalog
    /// entry sort ahead of peer-to-peer ones; all candidates are returned
    /// so the caller can still choose.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::UnknownEntry`] for ids outside the catalog.
    pub fn best_locator(&self, id: &EntryId) -> Result<Vec<LocatorCandidate>, CoverageError> {
        let coverage = self.coverage(id)?;
        let entry_size = coverage.entry.size;

        let mut candidates: Vec<LocatorCandidate> = Vec::new();
        for attribution in &coverage.matches {
            let size_agrees = match (entry_size, attribution.record.size) {
                (Some(expected), Some(actual)) => expected == actual,
                // Cannot disagree when either side is unknown.
                _ => true,
            };
            for locator in &attribution.record.locators {
                candidates.push(LocatorCandidate {
                    provider: attribution.record.provider.clone(),
                    locator: locator.clone(),
                    size_agrees,
                    confidence: attribution.confidence,
                });
            }
        }

        candidates.sort_by_key(|c| {
            let transport_rank = match c.locator.transport() {
                Transport::Http if c.size_agrees => 0,
                Transport::Peer if c.size_agrees => 1,
                Transport::Http => 2,
                Transport::Peer => 3,
            };
            let confidence_rank = match c.confidence {
                MatchConfidence::HashExact => 0,
                _ => 1,
            };
            (confidence_rank, transport_rank)
        });

        Ok(candidates)
    }

    /// Returns all orphaned provider records, for diagnostics.
    #[must_use]
    pub fn orphans(&self) -> Vec<Arc<ProviderRecord>> {
        let mut all: Vec<Arc<ProviderRecord>> = self
            .orphans
            .values()
            .flat_map(|records| records.iter().cloned())
            .collect();
        all.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        all
    }

    /// Matches one record, returning the entry index and confidence.
    fn match_record(&self, record: &ProviderRecord) -> Option<(usize, MatchConfidence)> {
        if record.hashes.has_strong() {
            // Hash-bearing records match by hash or not at all.
            for key in record.hashes.strong_keys() {
                if let Some(&index) = self.by_hash.get(&key) {
                    return Some((index, MatchConfidence::HashExact));
                }
            }
            return None;
        }

        let name_key = record.name_key()?;
        self.by_name
            .get(&name_key)
            .map(|&index| (index, MatchConfidence::NameApproximate))
    }

    /// Drops every attribution and orphan contributed by a provider.
    fn retract_provider(&mut self, provider: &ProviderId) {
        for matches in self.attributions.values_mut() {
            matches.retain(|attribution| &attribution.record.provider != provider);
        }
        self.attributions.retain(|_, matches| !matches.is_empty());
        self.orphans.remove(provider);
    }
}
