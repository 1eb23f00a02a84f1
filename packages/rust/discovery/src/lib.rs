//! Index resolution for DocAssembler.
//!
//! A bundle's index resource is fetched fresh on every run and its document
//! rules turn matching links into [`IndexCandidate`]s. When the bundle names
//! a sub-index selector, the index only points at further index pages, which
//! are fetched in turn before document rules are applied.
//!
//! Candidates come back in source order and are never deduplicated; that is
//! the catalog's job.

mod parser;

use tracing::{debug, info, instrument, warn};
use url::Url;

use docassembler_crawler::{CachePolicy, Fetcher};
use docassembler_shared::{Bundle, ContentProvider, IndexCandidate, Result, RunConfig};

use parser::IndexRules;

/// Levels of sub-index pages followed by default.
pub const DEFAULT_SUB_INDEX_DEPTH: u32 = 1;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Configuration for index resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// How many levels of sub-index pages to expand before applying document rules.
    pub sub_index_depth: u32,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            sub_index_depth: DEFAULT_SUB_INDEX_DEPTH,
        }
    }
}

impl From<&RunConfig> for ResolveOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            sub_index_depth: config.sub_index_depth,
        }
    }
}

/// Outcome of resolving one bundle.
#[derive(Debug, Clone)]
pub struct BundleIndex {
    pub bundle: String,
    /// Address of the top-level index.
    pub index_url: Url,
    pub candidates: Vec<IndexCandidate>,
    /// Index pages fetched, top level included.
    pub pages_fetched: usize,
    /// Sub-index pages that could not be fetched or parsed.
    pub failed_pages: Vec<(Url, String)>,
}

// ---------------------------------------------------------------------------
// Main entry points
// ---------------------------------------------------------------------------

/// Resolve every bundle of a provider, in declaration order.
pub async fn resolve_provider(
    fetcher: &Fetcher,
    provider: &ContentProvider,
    opts: &ResolveOptions,
) -> Result<Vec<BundleIndex>> {
    let mut indexes = Vec::with_capacity(provider.bundles.len());
    for bundle in &provider.bundles {
        indexes.push(resolve_bundle(fetcher, provider, bundle, opts).await?);
    }
    Ok(indexes)
}

/// Resolve one bundle into its ordered candidate list.
///
/// Failure to fetch or parse the top-level index fails the bundle. A failing
/// sub-index page is logged, recorded in [`BundleIndex::failed_pages`] and
/// skipped.
#[instrument(skip_all, fields(provider = %provider.name, bundle = %bundle.name))]
pub async fn resolve_bundle(
    fetcher: &Fetcher,
    provider: &ContentProvider,
    bundle: &Bundle,
    opts: &ResolveOptions,
) -> Result<BundleIndex> {
    let rules = IndexRules::compile(bundle)?;
    let index_url = provider.bundle_url(bundle)?;

    let mut result = BundleIndex {
        bundle: bundle.name.clone(),
        index_url: index_url.clone(),
        candidates: Vec::new(),
        pages_fetched: 0,
        failed_pages: Vec::new(),
    };

    let mut level = vec![index_url];
    let mut depth = 0;

    while !level.is_empty() {
        let expand = rules.has_sub_index() && depth < opts.sub_index_depth;
        let mut next = Vec::new();

        for page_url in level {
            let page = fetcher
                .fetch(&page_url, rules.format(), CachePolicy::Refresh)
                .await
                .and_then(|fetched| {
                    rules.parse_page(&fetched.body, &page_url, &provider.url, expand)
                });

            let page = match page {
                Ok(page) => page,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(url = %page_url, error = %e, "skipping sub-index page");
                    result.failed_pages.push((page_url, e.to_string()));
                    continue;
                }
            };

            result.pages_fetched += 1;
            debug!(
                url = %page_url,
                depth,
                sub_links = page.sub_links.len(),
                candidates = page.candidates.len(),
                "parsed index page"
            );
            next.extend(page.sub_links);
            result.candidates.extend(page.candidates);
        }

        if !expand {
            break;
        }
        level = next;
        depth += 1;
    }

    info!(
        pages = result.pages_fetched,
        candidates = result.candidates.len(),
        failed = result.failed_pages.len(),
        "resolved bundle index"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docassembler_shared::{DocumentRule, SourceKind};
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_fetcher() -> Fetcher {
        let dir = std::env::temp_dir().join(format!("da-discovery-test-{}", Uuid::now_v7()));
        Fetcher::with_settings(dir, "DocAssembler/test", Duration::from_secs(5)).unwrap()
    }

    fn provider(server: &MockServer, bundle: Bundle) -> ContentProvider {
        ContentProvider {
            name: "Kids Health Info".into(),
            url: Url::parse(&format!("{}/", server.uri())).unwrap(),
            bundles: vec![bundle],
        }
    }

    fn bundle(sub_index: Option<&str>) -> Bundle {
        Bundle {
            name: "Fact sheets".into(),
            url: "factsheets/".into(),
            sub_index_xpath: sub_index.map(str::to_string),
            postfix: Some("KHI".into()),
            format: SourceKind::Html,
            documents: vec![DocumentRule {
                url_xpath: Some("//a[@class='doc']".into()),
                synonym_reg_exp: Some(r"(?<title>.+) \((?<synonym>.+)\)".into()),
                ..Default::default()
            }],
        }
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolves_flat_index() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/factsheets/",
            r#"<ul>
                <li><a class="doc" href="/docs/asthma">Asthma (Wheezing)</a></li>
                <li><a class="doc" href="/docs/croup">Croup</a></li>
            </ul>"#,
        )
        .await;

        let provider = provider(&server, bundle(None));
        let index = resolve_bundle(
            &temp_fetcher(),
            &provider,
            &provider.bundles[0],
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(index.pages_fetched, 1);
        assert_eq!(index.candidates.len(), 2);
        assert_eq!(index.candidates[0].title, "Asthma");
        assert_eq!(index.candidates[0].synonym.as_deref(), Some("Wheezing"));
        assert_eq!(index.candidates[0].url.path(), "/docs/asthma");
        assert_eq!(index.candidates[1].display_title(), "Croup - KHI");
    }

    #[tokio::test]
    async fn expands_sub_index_pages_in_order() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/factsheets/",
            r#"<nav><a href="a-c">A-C</a><a href="d-f">D-F</a><a href="g-i">G-I</a></nav>
               <a class="doc" href="/docs/not-on-top-level">Skipped</a>"#,
        )
        .await;
        serve(
            &server,
            "/factsheets/a-c",
            r#"<a class="doc" href="/docs/asthma">Asthma (Wheezing)</a>
               <a class="doc" href="/docs/croup">Croup</a>"#,
        )
        .await;
        serve(
            &server,
            "/factsheets/d-f",
            r#"<a class="doc" href="/docs/eczema">Eczema</a>"#,
        )
        .await;
        Mock::given(path("/factsheets/g-i"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = provider(&server, bundle(Some("//nav/a")));
        let index = resolve_bundle(
            &temp_fetcher(),
            &provider,
            &provider.bundles[0],
            &ResolveOptions::default(),
        )
        .await
        .unwrap();

        let titles: Vec<_> = index.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Asthma", "Croup", "Eczema"]);
        assert_eq!(index.pages_fetched, 3);
        assert_eq!(index.failed_pages.len(), 1);
        assert!(index.failed_pages[0].0.path().ends_with("/g-i"));
    }

    #[tokio::test]
    async fn zero_depth_applies_document_rules_to_top_level() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/factsheets/",
            r#"<nav><a href="a-c">A-C</a></nav><a class="doc" href="/docs/fever">Fever</a>"#,
        )
        .await;

        let provider = provider(&server, bundle(Some("//nav/a")));
        let index = resolve_bundle(
            &temp_fetcher(),
            &provider,
            &provider.bundles[0],
            &ResolveOptions { sub_index_depth: 0 },
        )
        .await
        .unwrap();

        assert_eq!(index.candidates.len(), 1);
        assert_eq!(index.candidates[0].title, "Fever");
    }

    #[tokio::test]
    async fn missing_top_level_index_fails_the_bundle() {
        let server = MockServer::start().await;
        Mock::given(path("/factsheets/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider(&server, bundle(None));
        let err = resolve_bundle(
            &temp_fetcher(),
            &provider,
            &provider.bundles[0],
            &ResolveOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn index_with_no_matches_yields_nothing() {
        let server = MockServer::start().await;
        serve(&server, "/factsheets/", "<p>Nothing to see</p>").await;

        let provider = provider(&server, bundle(None));
        let indexes = resolve_provider(&temp_fetcher(), &provider, &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].candidates.is_empty());
    }

    #[tokio::test]
    async fn index_is_refetched_even_when_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/factsheets/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p></p>"))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = temp_fetcher();
        let provider = provider(&server, bundle(None));
        for _ in 0..2 {
            resolve_bundle(&fetcher, &provider, &provider.bundles[0], &ResolveOptions::default())
                .await
                .unwrap();
        }
    }
}
