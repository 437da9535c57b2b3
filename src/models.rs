use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SubjectId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Prequel,
    Sequel,
    SideStory,
    Derived,
    Other(i32),
}

impl RelationKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Self::Prequel,
            3 => Self::Sequel,
            6 => Self::SideStory,
            11 => Self::Derived,
            other => Self::Other(other),
        }
    }
}

/// One outgoing edge, stored under its source subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub target: SubjectId,
    pub kind: RelationKind,
    pub order: i32,
}

/// Outgoing relations per source subject, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RelationTable {
    contents: BTreeMap<SubjectId, Vec<Relation>>,
}

impl RelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: SubjectId, relation: Relation) {
        self.contents.entry(source).or_default().push(relation);
    }

    pub fn relations_of(&self, subject: SubjectId) -> &[Relation] {
        self.contents
            .get(&subject)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn subjects(&self) -> impl Iterator<Item = SubjectId> + '_ {
        self.contents.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn edge_count(&self) -> usize {
        self.contents.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeCounts {
    counts: HashMap<SubjectId, u32>,
}

impl EpisodeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, subject: SubjectId) {
        *self.counts.entry(subject).or_insert(0) += 1;
    }

    pub fn get(&self, subject: SubjectId) -> u32 {
        self.counts.get(&subject).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}

impl FromIterator<(SubjectId, u32)> for EpisodeCounts {
    fn from_iter<I: IntoIterator<Item = (SubjectId, u32)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRelationIndex {
    /// Main seasons of the series, earliest season first.
    pub series_main_subject_ids: Box<[SubjectId]>,
    /// Transitive sequels, side stories and derived works. Order is not significant.
    pub sequel_subject_ids: Box<[SubjectId]>,
}

#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub generated_at: DateTime<Utc>,
    pub source_subjects: usize,
    entries: HashMap<SubjectId, SubjectRelationIndex>,
}

impl IndexSnapshot {
    pub fn new(
        entries: HashMap<SubjectId, SubjectRelationIndex>,
        source_subjects: usize,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generated_at,
            source_subjects,
            entries,
        }
    }

    pub fn get(&self, subject: SubjectId) -> Option<&SubjectRelationIndex> {
        self.entries.get(&subject)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn entries(&self) -> &HashMap<SubjectId, SubjectRelationIndex> {
        &self.entries
    }
}

/// Upstream manifest pointing at the current archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub browser_download_url: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRelations {
    pub subject_id: SubjectId,
    pub series_main_subject_ids: Vec<SubjectId>,
    pub sequel_subject_ids: Vec<SubjectId>,
}

impl SubjectRelations {
    pub fn from_index(subject_id: SubjectId, index: Option<&SubjectRelationIndex>) -> Self {
        match index {
            Some(index) => Self {
                subject_id,
                series_main_subject_ids: index.series_main_subject_ids.to_vec(),
                sequel_subject_ids: index.sequel_subject_ids.to_vec(),
            },
            None => Self {
                subject_id,
                series_main_subject_ids: Vec::new(),
                sequel_subject_ids: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub entries: usize,
    pub source_subjects: usize,
    pub generated_at: Option<DateTime<Utc>>,
}
