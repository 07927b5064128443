use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::legacy;
use crate::models::{
    Application, College, Feedback, HasId, Id, InternshipPosting, Notice, Notification,
    ShortlistedCandidate, StudentSkills,
};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Applications,
    Postings,
    Notifications,
    Skills,
    Shortlisted,
    Colleges,
    Notices,
    Feedback,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Applications,
        Collection::Postings,
        Collection::Notifications,
        Collection::Skills,
        Collection::Shortlisted,
        Collection::Colleges,
        Collection::Notices,
        Collection::Feedback,
    ];

    /// The one key this collection is stored under.
    pub fn key(self) -> &'static str {
        match self {
            Collection::Applications => "applications",
            Collection::Postings => "internships",
            Collection::Notifications => "notifications",
            Collection::Skills => "skills",
            Collection::Shortlisted => "shortlisted",
            Collection::Colleges => "colleges",
            Collection::Notices => "notices",
            Collection::Feedback => "feedback",
        }
    }

    /// Keys older builds used for the same concept.
    pub fn legacy_keys(self) -> &'static [&'static str] {
        match self {
            Collection::Applications => &["applied_internships", "student_applied_internships"],
            Collection::Postings => &[
                "my_internships",
                "pending_internships",
                "approvedCollegeInternships",
            ],
            Collection::Notifications => &["student_notifications"],
            Collection::Shortlisted => &["shortlisted_candidates"],
            Collection::Skills | Collection::Colleges | Collection::Notices | Collection::Feedback => {
                &[]
            }
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        Collection::ALL
            .into_iter()
            .find(|c| c.key() == s || format!("{:?}", c).to_lowercase() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Collection::ALL.iter().map(|c| c.key()).collect();
                format!("unknown collection '{}' ({})", s, names.join(", "))
            })
    }
}

/// Binds a collection to the type of its items.
pub trait Schema {
    const COLLECTION: Collection;
    type Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
}

macro_rules! schema {
    ($($marker:ident => $collection:ident, $item:ty;)*) => {
        $(
            pub struct $marker;

            impl Schema for $marker {
                const COLLECTION: Collection = Collection::$collection;
                type Item = $item;
            }
        )*
    };
}

schema! {
    Applications => Applications, Application;
    Postings => Postings, InternshipPosting;
    Notifications => Notifications, Notification;
    Skills => Skills, StudentSkills;
    Shortlisted => Shortlisted, ShortlistedCandidate;
    Colleges => Colleges, College;
    Notices => Notices, Notice;
    FeedbackLog => Feedback, Feedback;
}

/// Read a collection. Never yields "nothing": a missing key is an empty list,
/// and a value of the wrong shape is logged and treated as empty.
pub fn load<S: Schema>(store: &Store) -> Result<Vec<S::Item>, StoreError> {
    let key = S::COLLECTION.key();
    match store.get(key, Vec::new()) {
        Ok(items) => Ok(items),
        Err(StoreError::SchemaMismatch { source, .. }) => {
            tracing::warn!(collection = %S::COLLECTION, error = %source, "stored value has the wrong shape, using empty collection");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Replace the whole stored collection with `items`. Returns the stored text.
pub fn save<S: Schema>(store: &Store, items: &[S::Item]) -> Result<String, StoreError> {
    store.set(S::COLLECTION.key(), items)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    pub duplicates: usize,
    /// Moved records whose legacy id was not a number and got a fresh one.
    pub renumbered: usize,
    pub skipped: usize,
    /// Legacy keys fully carried over and removed.
    pub legacy_keys: Vec<String>,
    /// Legacy keys kept because some of their records could not be read.
    /// They now hold only those records.
    pub retained: Vec<String>,
}

/// Fold every legacy key of `S` into its canonical key.
///
/// Records are adapted from older shapes first. Items already present under
/// the canonical key (by id) win over legacy copies. A legacy key is removed
/// only once everything in it is carried over; a canonical value that cannot
/// be read is an error and is never overwritten.
pub fn migrate<S>(store: &Store, now: DateTime<Utc>) -> Result<MigrationReport, StoreError>
where
    S: Schema,
    S::Item: HasId,
{
    let collection = S::COLLECTION;
    let mut report = MigrationReport::default();
    let mut items: Vec<S::Item> = store.get(collection.key(), Vec::new())?;
    let mut seen: HashSet<Id> = items.iter().map(HasId::id).collect();

    let mut batches = Vec::new();
    for &key in collection.legacy_keys() {
        let Some(raw) = store.get_raw(key)? else {
            continue;
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(values) => batches.push((key, values)),
            Err(e) => {
                tracing::warn!(key, error = %e, "legacy key is not a list, leaving it in place");
                report.skipped += 1;
                report.retained.push(key.to_string());
            }
        }
    }

    let adapted: Vec<(&str, Vec<(Value, Value)>)> = batches
        .into_iter()
        .map(|(key, values)| {
            let pairs = values
                .into_iter()
                .map(|original| (legacy::adapt(collection, original.clone(), now), original))
                .collect();
            (key, pairs)
        })
        .collect();

    // Non-numeric ids are replaced past every numeric id in sight
    let mut next_free = seen
        .iter()
        .copied()
        .chain(
            adapted
                .iter()
                .flat_map(|(_, pairs)| pairs.iter().filter_map(|(v, _)| legacy::numeric_id(v))),
        )
        .max()
        .map_or(1, |max| max + 1);

    let mut leftovers = Vec::new();
    for (key, pairs) in adapted {
        let total = pairs.len();
        let mut leftover = Vec::new();
        for (mut value, original) in pairs {
            let renumber = value.is_object() && legacy::numeric_id(&value).is_none();
            if renumber {
                value["id"] = Value::from(next_free);
            }
            match serde_json::from_value::<S::Item>(value) {
                Ok(item) if seen.insert(item.id()) => {
                    items.push(item);
                    report.moved += 1;
                    if renumber {
                        report.renumbered += 1;
                        next_free += 1;
                    }
                }
                Ok(_) => report.duplicates += 1,
                Err(e) => {
                    tracing::warn!(key, error = %e, "legacy record does not fit, keeping it");
                    report.skipped += 1;
                    leftover.push(original);
                }
            }
        }
        leftovers.push((key, total, leftover));
    }

    if report.moved > 0 {
        save::<S>(store, &items)?;
    }
    for (key, total, leftover) in leftovers {
        if leftover.is_empty() {
            store.remove(key)?;
            report.legacy_keys.push(key.to_string());
        } else {
            if leftover.len() < total {
                store.set(key, &leftover)?;
            }
            report.retained.push(key.to_string());
        }
    }

    if report != MigrationReport::default() {
        tracing::info!(
            %collection,
            moved = report.moved,
            duplicates = report.duplicates,
            renumbered = report.renumbered,
            skipped = report.skipped,
            "migrated legacy keys"
        );
    }
    Ok(report)
}
