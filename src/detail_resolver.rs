//! Cast and summary resolution over the detail APIs and the item page.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};

use crate::cascade::{CandidateKey, CandidateStrategy, Cascade};
use crate::config::CascadeConfig;
use crate::extractors::{
    subject_id, AbstractApiExtractor, DetailFields, Extractor, MobileApiExtractor,
    SubjectPageExtractor,
};
use crate::http_client::{FetchError, HttpClient};
use crate::validator::is_acceptable_text;

type DetailExtractor = Arc<dyn Extractor<Output = DetailFields>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailSubject {
    pub title: String,
    pub link: String,
}

/// One fetchable detail source and the extractor that understands it.
#[derive(Clone)]
pub struct DetailSource {
    pub locator: String,
    pub referer: String,
    extractor: DetailExtractor,
}

impl DetailSource {
    pub fn new(
        locator: impl Into<String>,
        referer: impl Into<String>,
        extractor: impl Extractor<Output = DetailFields> + 'static,
    ) -> Self {
        Self {
            locator: locator.into(),
            referer: referer.into(),
            extractor: Arc::new(extractor),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.extractor.source_name()
    }
}

impl std::fmt::Debug for DetailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailSource")
            .field("locator", &self.locator)
            .field("extractor", &self.source_name())
            .finish()
    }
}

impl CandidateKey for DetailSource {
    fn key(&self) -> &str {
        &self.locator
    }
}

/// Structured API keyed by the numeric subject id; yields nothing without one.
pub struct SubjectApiStrategy<E> {
    name: &'static str,
    url_template: String,
    referer_template: String,
    extractor: E,
}

impl<E> SubjectApiStrategy<E> {
    pub fn new(name: &'static str, url_template: &str, referer_template: &str, extractor: E) -> Self {
        Self {
            name,
            url_template: url_template.to_string(),
            referer_template: referer_template.to_string(),
            extractor,
        }
    }
}

impl<E> CandidateStrategy<DetailSubject, DetailSource> for SubjectApiStrategy<E>
where
    E: Extractor<Output = DetailFields> + Clone + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn candidates(&self, subject: &DetailSubject, _seeds: &[DetailSource]) -> Vec<DetailSource> {
        let Some(id) = subject_id(&subject.link) else {
            return Vec::new();
        };
        if self.url_template.trim().is_empty() {
            return Vec::new();
        }
        let referer = if self.referer_template.trim().is_empty() {
            subject.link.clone()
        } else {
            self.referer_template.replace("{id}", &id)
        };
        vec![DetailSource::new(
            self.url_template.replace("{id}", &id),
            referer,
            self.extractor.clone(),
        )]
    }
}

/// The rendered item page itself.
pub struct SubjectPageStrategy {
    referer: String,
}

impl CandidateStrategy<DetailSubject, DetailSource> for SubjectPageStrategy {
    fn name(&self) -> &'static str {
        "subject-page"
    }

    fn candidates(&self, subject: &DetailSubject, _seeds: &[DetailSource]) -> Vec<DetailSource> {
        let link = subject.link.trim();
        if link.is_empty() {
            return Vec::new();
        }
        vec![DetailSource::new(link, self.referer.as_str(), SubjectPageExtractor)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailCompleteness {
    Complete,
    Partial,
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDetails {
    pub cast: Option<String>,
    pub summary: Option<String>,
    pub cast_source: Option<String>,
    pub summary_source: Option<String>,
}

impl ResolvedDetails {
    pub fn completeness(&self) -> DetailCompleteness {
        match (&self.cast, &self.summary) {
            (Some(_), Some(_)) => DetailCompleteness::Complete,
            (None, None) => DetailCompleteness::Missing,
            _ => DetailCompleteness::Partial,
        }
    }
}

pub struct DetailResolver {
    client: HttpClient,
    cascade: Cascade<DetailSubject, DetailSource>,
}

impl DetailResolver {
    /// Mobile API, abstract API, then the page at the item link.
    pub fn new(client: HttpClient, config: &CascadeConfig) -> Self {
        let cascade = Cascade::new("details")
            .with_strategy(SubjectApiStrategy::new(
                "mobile-api",
                &config.detail_api_template,
                &config.detail_api_referer_template,
                MobileApiExtractor,
            ))
            .with_strategy(SubjectApiStrategy::new(
                "abstract-api",
                &config.abstract_api_template,
                "",
                AbstractApiExtractor,
            ))
            .with_strategy(SubjectPageStrategy {
                referer: client.page_referer().to_string(),
            });
        Self { client, cascade }
    }

    #[cfg(test)]
    pub fn sources(&self, subject: &DetailSubject) -> Vec<DetailSource> {
        self.cascade.plan(subject, &[], &[])
    }

    /// Resolves cast and summary as separate cascades over the same sources.
    /// Each source is fetched at most once per call.
    pub fn resolve(&self, subject: &DetailSubject) -> ResolvedDetails {
        let memo: RefCell<HashMap<String, Result<DetailFields, FetchError>>> =
            RefCell::new(HashMap::new());
        let fetch = |source: &DetailSource| -> Result<DetailFields, FetchError> {
            if let Some(cached) = memo.borrow().get(&source.locator) {
                return cached.clone();
            }
            let fetched = self
                .client
                .get_text(&source.locator, &source.referer)
                .map(|body| source.extractor.extract(&body));
            if let Err(error) = &fetched {
                debug!("detail source {} failed: {error}", source.source_name());
            }
            memo.borrow_mut()
                .insert(source.locator.clone(), fetched.clone());
            fetched
        };

        let cast = self.cascade.resolve(subject, &[], &[], &fetch, |fields| {
            fields.cast.as_deref().is_some_and(is_acceptable_text)
        });
        let summary = self.cascade.resolve(subject, &[], &[], &fetch, |fields| {
            fields.summary.as_deref().is_some_and(is_acceptable_text)
        });

        let resolved = ResolvedDetails {
            cast_source: cast
                .as_ref()
                .map(|found| found.candidate.source_name().to_string()),
            summary_source: summary
                .as_ref()
                .map(|found| found.candidate.source_name().to_string()),
            cast: cast.and_then(|found| found.artifact.cast),
            summary: summary.and_then(|found| found.artifact.summary),
        };
        info!(
            "Details for '{}': cast from {}, summary from {}",
            subject.title,
            resolved.cast_source.as_deref().unwrap_or("nowhere"),
            resolved.summary_source.as_deref().unwrap_or("nowhere")
        );
        resolved
    }
}
