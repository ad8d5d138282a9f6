use serde::{Deserialize, Serialize};

/// Backend page id. Negative ids are what the API reports for pages that do
/// not exist (or are invalid), so this stays signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub i64);

impl PageId {
    pub fn is_missing(self) -> bool {
        self.0 < 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub i32);

impl Namespace {
    pub const MEDIA: Self = Self(-2);
    pub const SPECIAL: Self = Self(-1);
    pub const MAIN: Self = Self(0);
    pub const TALK: Self = Self(1);
    pub const USER: Self = Self(2);
    pub const USER_TALK: Self = Self(3);
    pub const PROJECT: Self = Self(4);
    pub const PROJECT_TALK: Self = Self(5);
    pub const FILE: Self = Self(6);
    pub const FILE_TALK: Self = Self(7);
    pub const MEDIAWIKI: Self = Self(8);
    pub const TEMPLATE: Self = Self(10);
    pub const TEMPLATE_TALK: Self = Self(11);
    pub const HELP: Self = Self(12);
    pub const CATEGORY: Self = Self(14);
    pub const CATEGORY_TALK: Self = Self(15);

    /// Talk namespaces have odd ids. `%` would give -1 for SPECIAL, which
    /// still counts as odd here, matching the backend's parity rule.
    pub fn is_talk(self) -> bool {
        self.0 % 2 != 0
    }
}

/// A by-name reference to a user account (or IP).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub name: String,
}

impl UserRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A by-title reference to a category, including the "Category:" prefix as
/// the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryRef {
    pub title: String,
}

impl CategoryRef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl std::fmt::Display for CategoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title)
    }
}
