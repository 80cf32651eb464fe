//! Remote registry queries.
//!
//! Package metadata comes from the npm registry; the certified plugin index
//! (categories, lookup table) and the host changelog are static JSON/Markdown
//! files. Every cacheable lookup is keyed deterministically and served from
//! the [`RegistryCache`] while fresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{clean_description, full_name, short_name, split_package_name, PluginDescriptor};
use super::{PluginError, PluginResult};
use crate::core::{sort_newest_first, PackagesConfig, RegistryCache, RegistryConfig};

/// Number of releases reported by [`RegistryClient::releases`].
const RELEASE_COUNT: usize = 5;

/// Keyword npm search uses to tag certified plugins.
const CERTIFIED_KEYWORD: &str = "hoobs-certified";

/// HTTP GET transport.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Fetch and decode a JSON document.
    async fn get_json(&self, url: &str) -> PluginResult<Value>;

    /// Fetch a text document.
    async fn get_text(&self, url: &str) -> PluginResult<String>;
}

/// [`HttpFetch`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: Client,
}

impl ReqwestFetch {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> PluginResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("hbpm/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PluginError::Config(format!("unable to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> PluginResult<reqwest::Response> {
        tracing::debug!(url, "GET");

        let response = self.client.get(url).send().await.map_err(PluginError::remote)?;

        if !response.status().is_success() {
            return Err(PluginError::remote(format!("{} returned {}", url, response.status())));
        }

        Ok(response)
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get_json(&self, url: &str) -> PluginResult<Value> {
        self.get(url).await?.json().await.map_err(PluginError::remote)
    }

    async fn get_text(&self, url: &str) -> PluginResult<String> {
        self.get(url).await?.text().await.map_err(PluginError::remote)
    }
}

/// Registry metadata for a single package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub scope: Option<String>,
    /// Latest published version.
    pub version: Option<String>,
    /// Version installed locally, when the caller supplied one.
    pub installed: Option<String>,
    /// Last modification date.
    pub date: Option<String>,
    pub author: Option<String>,
    pub description: String,
    pub homepage: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub license: Option<String>,
    pub readme: Option<String>,
}

impl PackageInfo {
    /// Full package name.
    pub fn full_name(&self) -> String {
        full_name(self.scope.as_deref(), &self.name)
    }

    fn from_document(item: &Value, installed: Option<&str>) -> Self {
        let (scope, name) = split_package_name(str_field(item, "name").unwrap_or_default().as_str());

        let author = match item.get("author") {
            Some(Value::String(author)) => Some(author.clone()),
            Some(author) => str_field(author, "name"),
            None => None,
        };

        Self {
            name,
            scope,
            version: item.get("dist-tags").and_then(|tags| str_field(tags, "latest")),
            installed: installed.map(str::to_string),
            date: item.get("time").and_then(|time| str_field(time, "modified")),
            author,
            description: clean_description(&str_field(item, "description").unwrap_or_default()),
            homepage: str_field(item, "homepage"),
            keywords: string_list(item.get("keywords")),
            license: str_field(item, "license"),
            readme: str_field(item, "readme"),
        }
    }
}

/// The certified plugin lookup table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertifiedLookup {
    /// Names that may not be installed directly.
    #[serde(default)]
    pub lookup: BTreeMap<String, Value>,
    /// Certified package name to the community package it supersedes.
    #[serde(default)]
    pub certified: BTreeMap<String, String>,
}

/// A package returned by a registry search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub name: String,
    pub scope: Option<String>,
    pub version: Option<String>,
    /// Installed version, filled in by [`mark_installed`].
    pub installed: Option<String>,
    pub date: Option<String>,
    pub description: String,
    pub homepage: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SearchEntry {
    /// Full package name.
    pub fn full_name(&self) -> String {
        full_name(self.scope.as_deref(), &self.name)
    }

    fn from_search_object(object: &Value) -> Option<Self> {
        let item = object.get("package")?;
        let full = str_field(item, "name").unwrap_or_default();

        let homepage = item
            .get("links")
            .and_then(|links| str_field(links, "homepage"))
            .or_else(|| str_field(item, "homepage"));

        Some(Self {
            name: short_name(&full).to_string(),
            scope: str_field(item, "scope").filter(|scope| scope != "unscoped"),
            version: str_field(item, "version"),
            installed: None,
            date: str_field(item, "date"),
            description: clean_description(&str_field(item, "description").unwrap_or_default()),
            homepage,
            image: None,
            keywords: string_list(item.get("keywords")),
        })
    }
}

/// Fill in `installed` for entries present in a catalog listing.
pub fn mark_installed(entries: &mut [SearchEntry], installed: &BTreeMap<String, PluginDescriptor>) {
    for entry in entries {
        entry.installed = installed.get(&entry.full_name()).map(|d| d.version.clone());
    }
}

/// A release of the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub name: String,
    pub description: String,
    pub changelog: Option<String>,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Split a changelog into notes per `## <version>` heading.
pub fn parse_changelog(text: &str) -> BTreeMap<String, String> {
    let mut results: BTreeMap<String, String> = BTreeMap::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.starts_with("##") {
            current = line.replacen("## ", "", 1);
            results.entry(current.clone()).or_default();
        } else if !current.is_empty() {
            let notes = results.entry(current.clone()).or_default();

            if !notes.is_empty() {
                notes.push('\n');
            }

            notes.push_str(line);
        }
    }

    results
}

/// Client for the npm registry and the certified plugin index.
pub struct RegistryClient {
    http: Arc<dyn HttpFetch>,
    cache: Arc<RegistryCache>,
    config: RegistryConfig,
    trusted_scope: String,
    reserved: Vec<String>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("npm_url", &self.config.npm_url)
            .field("trusted_scope", &self.trusted_scope)
            .finish()
    }
}

impl RegistryClient {
    /// Create a client.
    pub fn new(
        http: Arc<dyn HttpFetch>,
        cache: Arc<RegistryCache>,
        config: RegistryConfig,
        packages: &PackagesConfig,
    ) -> Self {
        Self {
            http,
            cache,
            config,
            trusted_scope: packages.trusted_scope.clone(),
            reserved: packages.blocked.clone(),
        }
    }

    /// The first-party scope.
    pub fn trusted_scope(&self) -> &str {
        &self.trusted_scope
    }

    fn ttl(&self) -> Duration {
        self.config.cache_ttl()
    }

    fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = self.cache.get_as(key);

        if hit.is_some() {
            tracing::debug!(key, "Cache hit");
        }

        hit
    }

    fn npm_document_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.npm_url.trim_end_matches('/'), urlencoding::encode(name))
    }

    fn npm_search_url(&self, text: &str, size: Option<usize>) -> String {
        let base = format!("{}/-/v1/search?text={}", self.config.npm_url.trim_end_matches('/'), text);

        match size {
            Some(size) => format!("{base}&size={size}"),
            None => base,
        }
    }

    /// Registry metadata for `name`, recording `version` as the installed version.
    pub async fn package(&self, name: &str, version: Option<&str>) -> PluginResult<PackageInfo> {
        let key = match version {
            Some(version) => format!("package/{name}@{version}"),
            None => format!("package/{name}"),
        };

        if let Some(info) = self.cached(&key) {
            return Ok(info);
        }

        let document = self.http.get_json(&self.npm_document_url(name)).await?;

        if document.get("name").and_then(Value::as_str).is_none() {
            return Err(PluginError::remote(format!("{name} is not published")));
        }

        let info = PackageInfo::from_document(&document, version);
        self.cache.set_as(key, &info, self.ttl());

        Ok(info)
    }

    /// Certified plugin categories, sorted.
    pub async fn categories(&self) -> PluginResult<Vec<String>> {
        let key = "certified/categories";

        if let Some(categories) = self.cached(key) {
            return Ok(categories);
        }

        let url = format!("{}/categories.json", self.config.certified_url.trim_end_matches('/'));
        let mut categories: Vec<String> =
            serde_json::from_value(self.http.get_json(&url).await?).map_err(PluginError::remote)?;

        categories.sort();
        self.cache.set_as(key, &categories, self.ttl());

        Ok(categories)
    }

    /// The certified plugin lookup table.
    pub async fn lookup(&self) -> PluginResult<CertifiedLookup> {
        let key = "certified/plugins";

        if let Some(lookup) = self.cached(key) {
            return Ok(lookup);
        }

        let url = format!("{}/plugins.json", self.config.certified_url.trim_end_matches('/'));
        let lookup: CertifiedLookup =
            serde_json::from_value(self.http.get_json(&url).await?).map_err(PluginError::remote)?;

        self.cache.set_as(key, &lookup, self.ttl());

        Ok(lookup)
    }

    /// Certified plugins in `category`.
    pub async fn certified(&self, category: &str) -> PluginResult<Vec<SearchEntry>> {
        if category.is_empty() {
            return Ok(Vec::new());
        }

        let key = format!("certified/{category}");

        let objects: Vec<Value> = match self.cached(&key) {
            Some(objects) => objects,
            None => {
                let text = format!(
                    "@{}+keywords:{}+{}",
                    self.trusted_scope,
                    CERTIFIED_KEYWORD,
                    urlencoding::encode(category)
                );
                let response = self.http.get_json(&self.npm_search_url(&text, None)).await?;
                let objects = objects_of(&response);

                if !objects.is_empty() {
                    self.cache.set_as(key, &objects, self.ttl());
                }

                objects
            }
        };

        let images = self.config.images_url.trim_end_matches('/');

        Ok(objects
            .iter()
            .filter_map(SearchEntry::from_search_object)
            .map(|mut entry| {
                entry.image = Some(format!("{images}/{}.png", entry.name));
                entry
            })
            .collect())
    }

    /// Search the registry. Certified packages come first; blocked names are dropped.
    pub async fn search(
        &self,
        query: &str,
        keyword: &str,
        limit: usize,
    ) -> PluginResult<Vec<SearchEntry>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let blocked = self.blocked().await;

        let text = format!("{}+keywords:{}", urlencoding::encode(short_name(query)), keyword);
        let response = self.http.get_json(&self.npm_search_url(&text, Some(limit))).await?;

        let (certified, community): (Vec<_>, Vec<_>) = objects_of(&response)
            .iter()
            .filter(|object| {
                let name = object
                    .get("package")
                    .and_then(|item| item.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();

                !blocked.iter().any(|b| b == name)
            })
            .filter_map(SearchEntry::from_search_object)
            .partition(|entry| entry.scope.as_deref() == Some(self.trusted_scope.as_str()));

        Ok(certified.into_iter().chain(community).collect())
    }

    /// Reserved names plus every name in the certified lookup table.
    pub async fn blocked(&self) -> Vec<String> {
        let mut blocked = self.reserved.clone();

        match self.lookup().await {
            Ok(lookup) => blocked.extend(lookup.lookup.into_keys()),
            Err(e) => tracing::warn!(error = %e, "Certified lookup unavailable, using reserved names only"),
        }

        blocked
    }

    /// Release notes per version.
    pub async fn read_changelog(&self) -> PluginResult<BTreeMap<String, String>> {
        let key = "hoobs/changelog";

        if let Some(changelog) = self.cached(key) {
            return Ok(changelog);
        }

        let changelog = parse_changelog(&self.http.get_text(&self.config.changelog_url).await?);
        self.cache.set_as(key, &changelog, self.ttl());

        Ok(changelog)
    }

    /// The newest releases of the host application.
    pub async fn releases(&self) -> PluginResult<Vec<Release>> {
        let key = "hoobs/releases";

        if let Some(releases) = self.cached(key) {
            return Ok(releases);
        }

        let changelog = self.read_changelog().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Changelog unavailable");
            BTreeMap::new()
        });

        let document = self.http.get_json(&self.npm_document_url(&self.config.release_package)).await?;
        let versions = document
            .get("versions")
            .and_then(Value::as_object)
            .ok_or_else(|| PluginError::remote("release document has no versions"))?;

        let mut ordered: Vec<&String> = versions.keys().collect();
        sort_newest_first(&mut ordered);

        let releases: Vec<Release> = ordered
            .into_iter()
            .take(RELEASE_COUNT)
            .map(|version| {
                let item = &versions[version.as_str()];
                let version = str_field(item, "version").unwrap_or_else(|| version.clone());

                Release {
                    changelog: changelog.get(&version).cloned(),
                    name: str_field(item, "name").unwrap_or_default(),
                    description: clean_description(&str_field(item, "description").unwrap_or_default()),
                    version,
                }
            })
            .collect();

        self.cache.set_as(key, &releases, self.ttl());

        Ok(releases)
    }
}

fn objects_of(response: &Value) -> Vec<Value> {
    response.get("objects").and_then(Value::as_array).cloned().unwrap_or_default()
}
