// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-run memoization of archive lookups. */

use {
    crate::{
        database::{ArchiveDatabase, Identity, OverrideEntry, OverrideKind},
        error::Result,
    },
    std::{cell::RefCell, collections::HashMap},
};

/// Lookup results remembered for the duration of one run.
///
/// A cache is created when a run starts and passed by reference to everything
/// that queries the archive. Accepting an upload changes archive state, so the
/// pipeline clears the cache after every accept.
#[derive(Default)]
pub struct RunCache {
    identities: RefCell<HashMap<String, Option<Identity>>>,
    uploaders: RefCell<HashMap<(String, String), Vec<String>>>,
    overrides: RefCell<HashMap<(String, String, OverrideKind), Option<OverrideEntry>>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(
        &self,
        db: &dyn ArchiveDatabase,
        fingerprint: &str,
    ) -> Result<Option<Identity>> {
        let key = fingerprint.to_ascii_uppercase();

        if let Some(value) = self.identities.borrow().get(&key) {
            return Ok(value.clone());
        }

        let value = db.identity_for_fingerprint(fingerprint)?;
        self.identities.borrow_mut().insert(key, value.clone());

        Ok(value)
    }

    pub fn allowed_uploaders(
        &self,
        db: &dyn ArchiveDatabase,
        source: &str,
        suite: &str,
    ) -> Result<Vec<String>> {
        let key = (source.to_string(), suite.to_string());

        if let Some(value) = self.uploaders.borrow().get(&key) {
            return Ok(value.clone());
        }

        let value = db.allowed_uploaders(source, suite)?;
        self.uploaders.borrow_mut().insert(key, value.clone());

        Ok(value)
    }

    pub fn override_for(
        &self,
        db: &dyn ArchiveDatabase,
        package: &str,
        suite: &str,
        kind: OverrideKind,
    ) -> Result<Option<OverrideEntry>> {
        let key = (package.to_string(), suite.to_string(), kind);

        if let Some(value) = self.overrides.borrow().get(&key) {
            return Ok(value.clone());
        }

        let value = db.override_for(package, suite, kind)?;
        self.overrides.borrow_mut().insert(key, value.clone());

        Ok(value)
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.identities.borrow_mut().clear();
        self.uploaders.borrow_mut().clear();
        self.overrides.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::database::{ArchiveState, YamlArchiveDatabase},
    };

    #[test]
    fn identity_lookups_are_remembered() -> Result<()> {
        let db = YamlArchiveDatabase::in_memory(ArchiveState {
            identities: vec![Identity {
                fingerprint: "ABCD".to_string(),
                name: "Jane Doe".to_string(),
                email: "jane@example.org".to_string(),
                may_sponsor: false,
                restricted: false,
            }],
            ..Default::default()
        });
        let cache = RunCache::new();

        assert_eq!(
            cache.identity(&db, "abcd")?.map(|i| i.name),
            Some("Jane Doe".to_string())
        );
        assert!(cache.identities.borrow().contains_key("ABCD"));
        assert_eq!(cache.identity(&db, "EEEE")?, None);

        cache.clear();
        assert!(cache.identities.borrow().is_empty());

        Ok(())
    }
}
