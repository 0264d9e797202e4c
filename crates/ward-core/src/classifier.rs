//! Classification of foreground identifiers
//!
//! The debouncer asks an [`AppClassifier`] whether an identifier is a
//! user-facing app worth deciding on. Shell, launcher and system UI
//! processes are not.

use std::collections::HashSet;

use crate::types::AppId;

/// Pluggable user-facing app classification
pub trait AppClassifier: Send + Sync {
    fn is_user_facing_app(&self, app_id: &AppId) -> bool;
}

/// Shell, launcher and system UI identifiers that are never decided on
pub const SYSTEM_APP_IDS: &[&str] = &[
    "android",
    "com.android.systemui",
    "com.android.launcher",
    "com.android.launcher2",
    "com.android.launcher3",
    "com.google.android.apps.nexuslauncher",
    "com.sec.android.app.launcher",
    "com.miui.home",
    "com.huawei.android.launcher",
    "com.oppo.launcher",
    "com.android.inputmethod.latin",
    "com.google.android.inputmethod.latin",
];

/// Vendor and platform namespaces treated as system processes
pub const SYSTEM_PREFIXES: &[&str] = &[
    "com.android.",
    "com.google.android.",
    "com.samsung.",
    "com.sec.",
    "com.miui.",
    "com.huawei.",
    "com.coloros.",
    "com.oneplus.",
];

/// Consumer apps that ship under a system namespace
pub const USER_FACING_MARKERS: &[&str] = &[
    "chrome",
    "youtube",
    "gm",
    "photos",
    "maps",
    "messaging",
    "dialer",
    "contacts",
    "vending",
    "settings",
    "camera",
    "gallery",
];

/// Prefix heuristic with a substring allow-list override
///
/// An identifier is ignored when it is the guard itself, an exact shell
/// identifier, or carries a system prefix without any of the allow-list
/// markers. The allow-list only overrides the prefix rule.
pub struct HeuristicClassifier {
    own_app_id: AppId,
    system_ids: HashSet<String>,
    prefixes: Vec<String>,
    markers: Vec<String>,
}

impl HeuristicClassifier {
    pub fn new(own_app_id: impl Into<AppId>) -> Self {
        Self {
            own_app_id: own_app_id.into(),
            system_ids: SYSTEM_APP_IDS.iter().map(|s| s.to_string()).collect(),
            prefixes: SYSTEM_PREFIXES.iter().map(|s| s.to_string()).collect(),
            markers: USER_FACING_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add further exact-match identifiers to ignore
    pub fn with_ignored<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    fn is_allow_listed(&self, id: &str) -> bool {
        // Short markers must match a whole segment
        id.split('.').any(|segment| {
            self.markers.iter().any(|marker| {
                segment == marker.as_str() || (marker.len() > 2 && segment.contains(marker.as_str()))
            })
        })
    }
}

impl AppClassifier for HeuristicClassifier {
    fn is_user_facing_app(&self, app_id: &AppId) -> bool {
        let id = app_id.as_str();

        if id.is_empty() || app_id == &self.own_app_id || self.system_ids.contains(id) {
            return false;
        }

        if self.prefixes.iter().any(|p| id.starts_with(p.as_str())) {
            return self.is_allow_listed(id);
        }

        true
    }
}

/// Exact allow/deny list classifier
///
/// With an allow list, only listed identifiers are user-facing. Denied
/// identifiers are never user-facing.
#[derive(Default)]
pub struct ExactListClassifier {
    allow: Option<HashSet<AppId>>,
    deny: HashSet<AppId>,
}

impl ExactListClassifier {
    pub fn deny_only<I: IntoIterator<Item = AppId>>(deny: I) -> Self {
        Self {
            allow: None,
            deny: deny.into_iter().collect(),
        }
    }

    pub fn allow_only<I: IntoIterator<Item = AppId>>(allow: I) -> Self {
        Self {
            allow: Some(allow.into_iter().collect()),
            deny: HashSet::new(),
        }
    }
}

impl AppClassifier for ExactListClassifier {
    fn is_user_facing_app(&self, app_id: &AppId) -> bool {
        if self.deny.contains(app_id) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(app_id),
            None => true,
        }
    }
}
