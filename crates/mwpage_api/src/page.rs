//! A single wiki page as a lazily-hydrated remote-backed entity.
//!
//! A `Page` is created with an identity (title or page id) and nothing else.
//! The first accessor that needs metadata triggers one query that pulls page
//! info, protection, the latest revision (author + content), and category
//! membership; everything is cached on the instance. Writes go through an
//! optimistic-concurrency check (base/start timestamps plus a content
//! checksum) so the backend can detect conflicting edits without any
//! client-side locking.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use md5::{Digest, Md5};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use mwpage_domain::protection::{Protection, Restriction, parse_expiry};
use mwpage_domain::types::{CategoryRef, Namespace, PageId, RevisionId, UserRef};

use crate::client::ApiClient;
use crate::error::PageError;

/// Which edit operation is being submitted. Standard and create send full
/// replacement text; append/prepend send only the fragment and leave the
/// splice to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditType {
    Standard,
    Create,
    Append,
    Prepend,
}

impl EditType {
    fn text_param(self) -> &'static str {
        match self {
            Self::Standard | Self::Create => "text",
            Self::Append => "appendtext",
            Self::Prepend => "prependtext",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    /// Edit summary shown in the page history.
    pub summary: String,
    /// Mark the edit minor.
    pub minor: bool,
    /// Mark the edit as a bot edit; ignored by the backend unless the
    /// account holds the bot right.
    pub bot: bool,
    /// Skip the conflict precondition check and the content checksum.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    pub move_talk: bool,
    pub move_subpages: bool,
    pub no_redirect: bool,
    pub watch: bool,
    pub unwatch: bool,
}

/// Metadata cached after a successful hydration.
#[derive(Debug, Clone)]
struct Attrs {
    exists: bool,
    is_redirect: bool,
    namespace: Namespace,
    /// Present iff the page exists. Cleared when an edit goes through, so
    /// the next `content()` refetches.
    content: Option<String>,
    last_revid: Option<RevisionId>,
    last_editor: Option<UserRef>,
    categories: Vec<CategoryRef>,
    protection: Protection,
}

pub struct Page {
    api: Arc<dyn ApiClient>,
    title: String,
    page_id: i64,
    follow_redirects: bool,
    attrs: Option<Attrs>,
    /// Cached result of the redirect-target extraction; outer None means
    /// not computed yet.
    redirect_target: Option<Option<String>>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("title", &self.title)
            .field("page_id", &self.page_id)
            .field("follow_redirects", &self.follow_redirects)
            .field("hydrated", &self.attrs.is_some())
            .finish_non_exhaustive()
    }
}

impl Page {
    /// Construct from exactly one identity: a non-empty title or a non-zero
    /// page id. Supplying both or neither is a construction error.
    pub fn new(
        api: Arc<dyn ApiClient>,
        title: Option<String>,
        page_id: Option<i64>,
        follow_redirects: bool,
    ) -> Result<Self, PageError> {
        let title = title.filter(|t| !t.is_empty());
        let page_id = page_id.filter(|id| *id != 0);
        match (title, page_id) {
            (Some(title), None) => Ok(Self::by_title(api, title, follow_redirects)),
            (None, Some(id)) => Ok(Self::by_id(api, id, follow_redirects)),
            (Some(title), Some(id)) => Err(PageError::Construction(format!(
                "cannot specify both a title ({title:?}) and a page id ({id})"
            ))),
            (None, None) => Err(PageError::Construction(
                "you must specify either a title or a page id".into(),
            )),
        }
    }

    /// Construct by title. The title must be non-empty; `new` validates.
    pub fn by_title(api: Arc<dyn ApiClient>, title: impl Into<String>, follow_redirects: bool) -> Self {
        Self {
            api,
            title: title.into(),
            page_id: 0,
            follow_redirects,
            attrs: None,
            redirect_target: None,
        }
    }

    /// Construct by numeric page id. The id must be non-zero; `new` validates.
    pub fn by_id(api: Arc<dyn ApiClient>, page_id: i64, follow_redirects: bool) -> Self {
        Self {
            api,
            title: String::new(),
            page_id,
            follow_redirects,
            attrs: None,
            redirect_target: None,
        }
    }

    /// Build a page from a single revision id, hydrating it from that
    /// revision's record. Never follows redirects.
    pub async fn from_revision(api: Arc<dyn ApiClient>, revid: RevisionId) -> Result<Self, PageError> {
        let params = vec![
            ("prop", "info|revisions|categories".to_string()),
            ("inprop", "protection".to_string()),
            ("rvprop", "user|content".to_string()),
            ("revids", revid.0.to_string()),
        ];
        let mut records = api.query(1, &params).await?;
        if records.is_empty() {
            return Err(PageError::Response(format!(
                "no record returned for revision {}",
                revid.0
            )));
        }
        let record = records.remove(0);
        let mut page = Self::by_title(api, "", false);
        page.load(Some(record)).await?;
        Ok(page)
    }

    /// The page title: the constructor value until hydration, the backend's
    /// canonical form afterwards. Never triggers a query.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The numeric page id. Eager: the constructor value (0 when built by
    /// title) until a hydration or edit updates it; negative once the
    /// backend reports the page missing.
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id)
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Fetch and cache the page's metadata, overwriting any cached state.
    ///
    /// With `presupplied`, that record is parsed instead of issuing the
    /// query (it must come from a query with `prop=info|revisions|categories`,
    /// `inprop=protection`, `rvprop=user|content`).
    ///
    /// If the page was constructed with `follow_redirects` and the fresh
    /// record is a redirect, the identity is retargeted to the redirect's
    /// target title and the load repeats from the network, so the page
    /// transparently behaves as the final target. A redirect whose content
    /// does not match the extraction pattern stays as-is.
    pub async fn load(&mut self, presupplied: Option<Value>) -> Result<(), PageError> {
        self.fetch(presupplied).await?;
        if self.follow_redirects && self.attrs_ref()?.is_redirect {
            let target = self
                .attrs_ref()?
                .content
                .as_deref()
                .and_then(redirect_target_title);
            if let Some(target) = target {
                debug!(from = %self.title, to = %target, "following redirect");
                self.title = target;
                self.attrs = None;
                self.redirect_target = None;
                self.fetch(None).await?;
            }
        }
        Ok(())
    }

    async fn fetch(&mut self, presupplied: Option<Value>) -> Result<(), PageError> {
        let record = match presupplied {
            Some(record) => record,
            None => {
                let mut params = vec![
                    ("prop", "info|revisions|categories".to_string()),
                    ("inprop", "protection".to_string()),
                    ("rvprop", "user|content".to_string()),
                    ("rvlimit", "1".to_string()),
                    ("rvdir", "older".to_string()),
                ];
                if !self.title.is_empty() {
                    params.push(("titles", self.title.clone()));
                } else if self.page_id != 0 {
                    params.push(("pageids", self.page_id.to_string()));
                } else {
                    return Err(PageError::Construction(
                        "neither title nor page id is set".into(),
                    ));
                }
                let mut records = self.api.query(1, &params).await?;
                if records.is_empty() {
                    return Err(PageError::Response(format!(
                        "no record returned for page {:?}",
                        self.identity()
                    )));
                }
                records.remove(0)
            }
        };
        self.apply_record(&record)
    }

    fn apply_record(&mut self, record: &Value) -> Result<(), PageError> {
        // Canonical title, in case the constructor value was entered oddly
        // or the page was addressed by id.
        if let Some(title) = record["title"].as_str() {
            self.title = title.to_string();
        }
        let is_redirect = record.get("redirect").is_some();
        self.page_id = record["pageid"].as_i64().unwrap_or(-1);

        let exists = if self.page_id < 0 {
            // A negative id with a missing marker is ordinary non-existence;
            // without the marker the title itself is malformed or forbidden.
            if record.get("missing").is_some() {
                false
            } else {
                return Err(PageError::InvalidPage(self.title.clone()));
            }
        } else {
            true
        };

        let content = if exists {
            Some(
                record["revisions"][0]["*"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            )
        } else {
            None
        };

        let namespace = Namespace(record["ns"].as_i64().unwrap_or(0) as i32);

        let mut protection = Protection::default();
        if let Some(entries) = record.get("protection").and_then(|p| p.as_array()) {
            for entry in entries {
                let Some(action) = entry["type"].as_str() else {
                    continue;
                };
                let restriction = Restriction {
                    level: entry["level"].as_str().map(String::from),
                    expiry: Some(parse_expiry(entry["expiry"].as_str())),
                };
                protection.set(action, restriction);
            }
        }

        // Only present when the page exists and the revision is visible.
        let (last_editor, last_revid) = match (
            record["revisions"][0]["user"].as_str(),
            record["lastrevid"].as_u64(),
        ) {
            (Some(user), Some(revid)) => (Some(UserRef::new(user)), Some(RevisionId(revid))),
            _ => (None, None),
        };

        let categories = record["categories"]
            .as_array()
            .map(|cats| {
                cats.iter()
                    .filter_map(|c| c["title"].as_str())
                    .map(CategoryRef::new)
                    .collect()
            })
            .unwrap_or_default();

        self.attrs = Some(Attrs {
            exists,
            is_redirect,
            namespace,
            content,
            last_revid,
            last_editor,
            categories,
            protection,
        });
        self.redirect_target = None;
        Ok(())
    }

    async fn ensure_loaded(&mut self) -> Result<(), PageError> {
        if self.attrs.is_none() {
            self.load(None).await?;
        }
        Ok(())
    }

    fn attrs_ref(&self) -> Result<&Attrs, PageError> {
        self.attrs.as_ref().ok_or_else(|| {
            PageError::Response(format!("page {:?} has no loaded attributes", self.identity()))
        })
    }

    fn identity(&self) -> String {
        if self.title.is_empty() {
            format!("#{}", self.page_id)
        } else {
            self.title.clone()
        }
    }

    /// Whether the page exists. Valid for missing pages (false) and never
    /// fails for them; hydrates on first call.
    pub async fn exists(&mut self) -> Result<bool, PageError> {
        self.ensure_loaded().await?;
        Ok(self.attrs_ref()?.exists)
    }

    pub async fn is_redirect(&mut self) -> Result<bool, PageError> {
        self.ensure_loaded().await?;
        Ok(self.attrs_ref()?.is_redirect)
    }

    pub async fn namespace(&mut self) -> Result<Namespace, PageError> {
        self.ensure_loaded().await?;
        Ok(self.attrs_ref()?.namespace)
    }

    pub async fn is_talk_page(&mut self) -> Result<bool, PageError> {
        Ok(self.namespace().await?.is_talk())
    }

    pub async fn protection(&mut self) -> Result<Protection, PageError> {
        self.ensure_loaded().await?;
        Ok(self.attrs_ref()?.protection.clone())
    }

    /// Categories the page belongs to, in response order. Empty for missing
    /// pages.
    pub async fn categories(&mut self) -> Result<Vec<CategoryRef>, PageError> {
        self.ensure_loaded().await?;
        Ok(self.attrs_ref()?.categories.clone())
    }

    /// The page's wikitext. Refetches if a successful edit invalidated the
    /// cache; fails with `NonexistentPage` for missing pages.
    pub async fn content(&mut self) -> Result<String, PageError> {
        let stale = match &self.attrs {
            None => true,
            Some(attrs) => attrs.exists && attrs.content.is_none(),
        };
        if stale {
            self.load(None).await?;
        }
        let attrs = self.attrs_ref()?;
        if !attrs.exists {
            return Err(PageError::NonexistentPage(self.title.clone()));
        }
        attrs.content.clone().ok_or_else(|| {
            PageError::Response(format!("no revision content for page {:?}", self.title))
        })
    }

    /// The user who made the latest revision, when visible. Fails with
    /// `NonexistentPage` for missing pages.
    pub async fn last_editor(&mut self) -> Result<Option<UserRef>, PageError> {
        self.ensure_loaded().await?;
        let attrs = self.attrs_ref()?;
        if !attrs.exists {
            return Err(PageError::NonexistentPage(self.title.clone()));
        }
        Ok(attrs.last_editor.clone())
    }

    /// The latest revision id. Fails with `NonexistentPage` for missing
    /// pages.
    pub async fn last_revision_id(&mut self) -> Result<Option<RevisionId>, PageError> {
        self.ensure_loaded().await?;
        let attrs = self.attrs_ref()?;
        if !attrs.exists {
            return Err(PageError::NonexistentPage(self.title.clone()));
        }
        Ok(attrs.last_revid)
    }

    /// The page this page redirects to: `Ok(None)` when the page is not a
    /// redirect or its redirect content is malformed, a fresh unhydrated
    /// `Page` for the extracted target otherwise. Fails with
    /// `NonexistentPage` for missing pages. The extraction is computed once
    /// and cached.
    pub async fn redirect_target(&mut self) -> Result<Option<Page>, PageError> {
        self.ensure_loaded().await?;
        let (exists, is_redirect) = {
            let attrs = self.attrs_ref()?;
            (attrs.exists, attrs.is_redirect)
        };
        if !exists {
            return Err(PageError::NonexistentPage(self.title.clone()));
        }
        if !is_redirect {
            return Ok(None);
        }
        if self.redirect_target.is_none() {
            let target = self
                .attrs_ref()?
                .content
                .as_deref()
                .and_then(redirect_target_title);
            self.redirect_target = Some(target);
        }
        Ok(self
            .redirect_target
            .clone()
            .flatten()
            .map(|title| Page::by_title(self.api.clone(), title, false)))
    }

    /// Replace the page's content. See `EditOptions` for the flags; the raw
    /// backend payload is returned so callers can inspect write failures
    /// (edit conflicts, checksum mismatch) the backend reports.
    pub async fn edit(&mut self, text: &str, opts: &EditOptions) -> Result<Value, PageError> {
        self.submit(text, opts, EditType::Standard).await
    }

    /// Create the page. The backend rejects the write if the page already
    /// exists; that failure comes back in the returned payload.
    pub async fn create(&mut self, text: &str, opts: &EditOptions) -> Result<Value, PageError> {
        self.submit(text, opts, EditType::Create).await
    }

    /// Append a fragment to the end of the page, server-side.
    pub async fn append(&mut self, text: &str, opts: &EditOptions) -> Result<Value, PageError> {
        self.submit(text, opts, EditType::Append).await
    }

    /// Prepend a fragment to the start of the page, server-side.
    pub async fn prepend(&mut self, text: &str, opts: &EditOptions) -> Result<Value, PageError> {
        self.submit(text, opts, EditType::Prepend).await
    }

    async fn submit(
        &mut self,
        text: &str,
        opts: &EditOptions,
        edit_type: EditType,
    ) -> Result<Value, PageError> {
        if self.title.is_empty() {
            // Pages addressed by id need their canonical title before the
            // check-then-write sequence, which is keyed by title.
            self.ensure_loaded().await?;
        }
        let title = self.title.clone();
        if title.to_lowercase().starts_with("special:") {
            return Err(PageError::InvalidPage(title));
        }

        let token = self.acquire_token("edit", &title).await?;

        let mut params: Vec<(&str, String)> = vec![
            ("action", "edit".to_string()),
            ("title", title.clone()),
            ("token", token),
            ("summary", opts.summary.clone()),
            (edit_type.text_param(), text.to_string()),
            (if opts.minor { "minor" } else { "notminor" }, "1".to_string()),
            (if opts.bot { "bot" } else { "notbot" }, "1".to_string()),
            (
                match edit_type {
                    EditType::Create => "createonly",
                    _ => "nocreate",
                },
                "1".to_string(),
            ),
        ];

        if !opts.force {
            let check_params = vec![
                ("prop", "revisions".to_string()),
                ("rvprop", "timestamp".to_string()),
                ("titles", title.clone()),
            ];
            let records = self.api.query(1, &check_params).await?;
            let record = records.first().ok_or_else(|| {
                PageError::Response(format!("no record returned for page {title:?}"))
            })?;
            if record.get("missing").is_some() && edit_type != EditType::Create {
                return Err(PageError::NonexistentPage(title));
            }
            if record["ns"].as_i64() == Some(Namespace::SPECIAL.0 as i64) {
                return Err(PageError::InvalidPage(title));
            }
            if edit_type != EditType::Create {
                // A record with no revisions gives no base timestamp to
                // detect conflicts against; treat it like a missing page.
                let base = record["revisions"][0]["timestamp"]
                    .as_str()
                    .ok_or_else(|| PageError::NonexistentPage(title.clone()))?
                    .to_string();
                params.push(("basetimestamp", base));
                params.push((
                    "starttimestamp",
                    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                ));
            }
            // Lets the backend reject text corrupted in transit.
            params.push(("md5", content_checksum(text)));
        }

        let res = self.api.call(&params).await?;
        if res["edit"]["result"].as_str() == Some("Success") {
            info!(title = %title, ?edit_type, "edit succeeded");
            if let Some(attrs) = self.attrs.as_mut() {
                attrs.content = None;
                attrs.exists = true;
                attrs.last_revid = res["edit"]["newrevid"].as_u64().map(RevisionId);
            }
            if let Some(normalized) = res["edit"]["title"].as_str() {
                self.title = normalized.to_string();
            }
            self.redirect_target = None;
        }
        Ok(res)
    }

    /// Move the page to `target`. Cached state is not touched on success;
    /// re-load to observe the new title.
    pub async fn move_to(
        &mut self,
        target: &str,
        reason: &str,
        opts: &MoveOptions,
    ) -> Result<Value, PageError> {
        if self.title.is_empty() {
            self.ensure_loaded().await?;
        }
        let title = self.title.clone();
        let token = self.acquire_token("move", &title).await?;

        let mut params: Vec<(&str, String)> = vec![
            ("action", "move".to_string()),
            ("from", title.clone()),
            ("to", target.to_string()),
            ("reason", reason.to_string()),
            ("token", token),
        ];
        for (flag, set) in [
            ("movetalk", opts.move_talk),
            ("movesubpages", opts.move_subpages),
            ("noredirect", opts.no_redirect),
            ("watch", opts.watch),
            ("unwatch", opts.unwatch),
        ] {
            if set {
                params.push((flag, "1".to_string()));
            }
        }

        let res = self.api.call(&params).await?;
        info!(from = %title, to = target, "move submitted");
        Ok(res)
    }

    async fn acquire_token(&self, capability: &str, title: &str) -> Result<String, PageError> {
        if let Some(token) = self.api.token(capability).await {
            return Ok(token);
        }
        self.api.set_token(capability).await?;
        self.api
            .token(capability)
            .await
            .ok_or_else(|| PageError::Permission {
                capability: capability.to_string(),
                title: title.to_string(),
            })
    }
}

/// Extract the target title from redirect wikitext. Anchored at the start,
/// case-insensitive; returns None for anything that does not look like
/// `#REDIRECT [[Target]]`.
fn redirect_target_title(content: &str) -> Option<String> {
    static REDIRECT_RE: OnceLock<Regex> = OnceLock::new();
    let re = REDIRECT_RE.get_or_init(|| {
        Regex::new(r"(?i)^#redirect\s*\[\[(.+?)\]\]").expect("known-valid regex")
    });
    re.captures(content).map(|caps| caps[1].to_string())
}

fn content_checksum(text: &str) -> String {
    format!("{:x}", Md5::digest(text.as_bytes()))
}
