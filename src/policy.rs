// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Policy
//!
//! Closed `Category -> StoragePolicy` table. Every logical key resolves to
//! exactly one category, either by exact match of its base segment or by the
//! documented default (`AppCache`) when the key is explicitly whitelisted.
//!
//! | Category | Tier | Encrypt | Sync | Retention | PHI |
//! |---|---|---|---|---|---|
//! | `HealthProfile` | SECURE | yes | no | - | yes |
//! | `StackItems` | SECURE | yes | no | - | yes |
//! | `ScanHistory` | SECURE | yes | no | 365 d | yes |
//! | `UserPreferences` | SECURE | yes | no | - | yes |
//! | `AppCache` | LOCAL | no | no | 7 d | no |
//! | `Analytics` | CLOUD | no | yes | 90 d | no |
//! | `AppState` | LOCAL | no | no | - | no |
//!
//! The table is validated once at startup; a PHI category that is not
//! `SECURE + encrypt + !sync` is a `PolicyViolation`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::models::DataType;

/// Storage tier a category is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Encrypted, durable, local.
    Secure,
    /// Fast, unencrypted, local.
    Local,
    /// Sync-eligible, non-PHI only.
    Cloud,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Secure => "SECURE",
            Tier::Local => "LOCAL",
            Tier::Cloud => "CLOUD",
        })
    }
}

/// Logical storage category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HealthProfile,
    StackItems,
    ScanHistory,
    UserPreferences,
    AppCache,
    Analytics,
    AppState,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::HealthProfile,
        Category::StackItems,
        Category::ScanHistory,
        Category::UserPreferences,
        Category::AppCache,
        Category::Analytics,
        Category::AppState,
    ];

    /// Category of an unknown but whitelisted key.
    pub const DEFAULT: Category = Category::AppCache;

    /// Whether the category holds PHI. Fixed per category, never configurable.
    pub fn is_phi(self) -> bool {
        matches!(
            self,
            Category::HealthProfile
                | Category::StackItems
                | Category::ScanHistory
                | Category::UserPreferences
        )
    }

    /// Record data type backing a PHI category.
    pub fn data_type(self) -> Option<DataType> {
        match self {
            Category::HealthProfile => Some(DataType::HealthProfile),
            Category::StackItems => Some(DataType::StackItem),
            Category::ScanHistory => Some(DataType::ScanHistory),
            Category::UserPreferences => Some(DataType::Preferences),
            Category::AppCache | Category::Analytics | Category::AppState => None,
        }
    }

    /// Built-in policy of each category.
    pub fn standard_policy(self) -> StoragePolicy {
        match self {
            Category::HealthProfile | Category::StackItems | Category::UserPreferences => {
                StoragePolicy::secure(None)
            }
            Category::ScanHistory => StoragePolicy::secure(Some(365)),
            Category::AppCache => StoragePolicy {
                tier: Tier::Local,
                encrypt: false,
                sync: false,
                retention_days: Some(7),
            },
            Category::Analytics => StoragePolicy {
                tier: Tier::Cloud,
                encrypt: false,
                sync: true,
                retention_days: Some(90),
            },
            Category::AppState => StoragePolicy {
                tier: Tier::Local,
                encrypt: false,
                sync: false,
                retention_days: None,
            },
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::HealthProfile => "health_profile",
            Category::StackItems => "stack_items",
            Category::ScanHistory => "scan_history",
            Category::UserPreferences => "user_preferences",
            Category::AppCache => "app_cache",
            Category::Analytics => "analytics",
            Category::AppState => "app_state",
        })
    }
}

/// Routing rule for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoragePolicy {
    pub tier: Tier,
    pub encrypt: bool,
    /// Cloud eligibility.
    pub sync: bool,
    pub retention_days: Option<u32>,
}

impl StoragePolicy {
    fn secure(retention_days: Option<u32>) -> Self {
        Self {
            tier: Tier::Secure,
            encrypt: true,
            sync: false,
            retention_days,
        }
    }
}

/// Exact logical key names and the category each maps to.
const KEY_MAP: &[(&str, Category)] = &[
    ("health_profile", Category::HealthProfile),
    ("user_stack", Category::StackItems),
    ("stack_items", Category::StackItems),
    ("scan_history", Category::ScanHistory),
    ("user_preferences", Category::UserPreferences),
    ("app_cache", Category::AppCache),
    ("analytics", Category::Analytics),
    ("analytics_events", Category::Analytics),
    ("app_state", Category::AppState),
    ("onboarding_complete", Category::AppState),
    ("theme", Category::AppState),
];

/// Fragments that mark a key name as likely PHI.
const PHI_MARKERS: &[&str] = &[
    "health",
    "medic",
    "supplement",
    "allerg",
    "condition",
    "diagnos",
    "pregnan",
    "symptom",
    "dose",
    "stack",
    "scan",
    "profile",
    "blood",
    "weight",
];

/// Result of resolving a logical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub category: Category,
    pub policy: StoragePolicy,
}

/// Base segment of a logical key: everything before the first `:`.
pub fn base_segment(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

/// Whether a key name looks like it carries PHI.
pub fn looks_like_phi(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    PHI_MARKERS.iter().any(|m| lower.contains(m))
}

/// Validated policy table plus the default-route whitelist.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: BTreeMap<Category, StoragePolicy>,
    whitelist: Vec<String>,
}

impl PolicyTable {
    /// Standard policies for every category, empty whitelist.
    pub fn standard() -> Self {
        Self {
            policies: Category::ALL
                .into_iter()
                .map(|c| (c, c.standard_policy()))
                .collect(),
            whitelist: Vec::new(),
        }
    }

    /// Replace one category's policy. Checked by [`validate`](Self::validate).
    pub fn with_override(mut self, category: Category, policy: StoragePolicy) -> Self {
        self.policies.insert(category, policy);
        self
    }

    /// Unknown keys (or `prefix*` patterns) allowed to take the default route.
    pub fn with_whitelist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Check that every category has a policy and that PHI stays SECURE.
    pub fn validate(&self) -> StoreResult<()> {
        for category in Category::ALL {
            let Some(policy) = self.policies.get(&category) else {
                return Err(StoreError::PolicyViolation(format!(
                    "category {category} has no policy"
                )));
            };
            if category.is_phi()
                && (policy.tier != Tier::Secure || !policy.encrypt || policy.sync)
            {
                return Err(StoreError::PolicyViolation(format!(
                    "PHI category {category} must be SECURE, encrypted and not synced (got {} encrypt={} sync={})",
                    policy.tier, policy.encrypt, policy.sync
                )));
            }
            if policy.tier == Tier::Secure && category.data_type().is_none() {
                return Err(StoreError::PolicyViolation(format!(
                    "category {category} has no record type for the SECURE tier"
                )));
            }
        }
        Ok(())
    }

    pub fn policy(&self, category: Category) -> StoragePolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.standard_policy())
    }

    /// All categories and their policies.
    pub fn iter(&self) -> impl Iterator<Item = (Category, StoragePolicy)> + '_ {
        self.policies.iter().map(|(c, p)| (*c, *p))
    }

    /// Map a logical key to its category and policy.
    ///
    /// # Errors
    /// `UnroutableKey` when the key is unknown and either looks like PHI or is
    /// not whitelisted.
    pub fn resolve(&self, key: &str) -> StoreResult<Route> {
        let base = base_segment(key);
        if let Some((_, category)) = KEY_MAP.iter().find(|(name, _)| *name == base) {
            return Ok(self.route(*category));
        }

        if looks_like_phi(key) || !self.is_whitelisted(key) {
            return Err(StoreError::UnroutableKey {
                key: key.to_string(),
            });
        }
        Ok(self.route(Category::DEFAULT))
    }

    /// Category a key in the LOCAL tier belongs to, if it resolves.
    pub fn category_of(&self, key: &str) -> Option<Category> {
        self.resolve(key).ok().map(|r| r.category)
    }

    fn route(&self, category: Category) -> Route {
        Route {
            category,
            policy: self.policy(category),
        }
    }

    fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => entry == key || entry == base_segment(key),
        })
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}
