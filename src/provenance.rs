//! Provenance metadata attached to job records.
//!
//! Package listings are collected by external retracing utilities; the
//! core only consumes the result, a sequence of package entries plus a
//! file-to-package ownership map, and serialises it alongside the job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One installed package as reported by the listing collaborator.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageEntry {
    /// Package name.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Install location, when the collaborator reports one.
    pub location: Option<String>,
}

/// A package listing supplied by an external collaborator, attached to a
/// job record verbatim.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageListing {
    /// Installed packages, in the collaborator's order.
    pub packages: Vec<PackageEntry>,
    /// Mapping of installed file path to owning package name.
    pub file_owners: BTreeMap<String, String>,
}

impl PackageListing {
    /// Builds a listing from `(name, version, location)` triples.
    #[must_use]
    pub fn from_triples<I>(triples: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Option<String>)>,
    {
        Self {
            packages: triples
                .into_iter()
                .map(|(name, version, location)| PackageEntry {
                    name,
                    version,
                    location,
                })
                .collect(),
            file_owners: BTreeMap::new(),
        }
    }

    /// Records which package owns an installed file.
    pub fn record_owner(&mut self, path: impl Into<String>, package: impl Into<String>) {
        self.file_owners.insert(path.into(), package.into());
    }

    /// Returns the package owning `path`, when known.
    #[must_use]
    pub fn owner_of(&self, path: &str) -> Option<&str> {
        self.file_owners.get(path).map(String::as_str)
    }
}

/// Serialisable summary of one orchestrated job.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JobRecord {
    /// Job-unique identifier, also the working directory name.
    pub job_id: String,
    /// Command the job ran.
    pub command: String,
    /// Submission backend tag the job used.
    pub submission_type: String,
    /// Final (or current) lifecycle phase.
    pub status: String,
    /// Declared input paths.
    pub inputs: Vec<String>,
    /// Declared output paths.
    pub outputs: Vec<String>,
    /// Optional package listing for provenance.
    pub packages: Option<PackageListing>,
}

impl JobRecord {
    /// Renders the record as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] when serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
