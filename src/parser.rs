//! Line-oriented readers for the archive's `jsonlines` dumps.
//!
//! Every line is one JSON object. Unknown fields are ignored so upstream can
//! add columns freely; a line missing a required field fails the whole file.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    error::{RelationsError, Result},
    models::{EpisodeCounts, Relation, RelationKind, RelationTable, SubjectId},
};

pub const RELATIONS_FILE_NAME: &str = "subject-relations.jsonlines";
pub const EPISODES_FILE_NAME: &str = "episode.jsonlines";

/// Episode type used upstream for regular (non-special) episodes.
const MAIN_EPISODE_TYPE: i32 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpisodeCountMode {
    /// Every episode record counts toward its subject.
    #[default]
    All,
    /// Only main episodes count; specials, OPs and EDs are skipped.
    MainOnly,
}

// {"subject_id":1,"relation_type":1,"related_subject_id":296317,"order":0}
#[derive(Debug, Deserialize)]
struct RelationRecord {
    subject_id: SubjectId,
    relation_type: i32,
    related_subject_id: SubjectId,
    order: i32,
}

// {"id":8,"subject_id":15,"sort":1,"airdate":"2008-07-04","type":0}
#[derive(Debug, Deserialize)]
struct EpisodeRecord {
    subject_id: SubjectId,
    #[serde(rename = "type")]
    episode_type: i32,
}

pub fn parse_relations(path: &Path) -> Result<RelationTable> {
    let file = File::open(path).map_err(|err| RelationsError::io(path, err))?;
    parse_relations_from(BufReader::new(file), path)
}

pub fn parse_relations_from<R: BufRead>(reader: R, origin: &Path) -> Result<RelationTable> {
    let mut table = RelationTable::new();
    for_each_record(reader, origin, |record: RelationRecord| {
        table.push(
            record.subject_id,
            Relation {
                target: record.related_subject_id,
                kind: RelationKind::from_code(record.relation_type),
                order: record.order,
            },
        );
    })?;
    Ok(table)
}

pub fn parse_episode_counts(path: &Path, mode: EpisodeCountMode) -> Result<EpisodeCounts> {
    let file = File::open(path).map_err(|err| RelationsError::io(path, err))?;
    parse_episode_counts_from(BufReader::new(file), path, mode)
}

pub fn parse_episode_counts_from<R: BufRead>(
    reader: R,
    origin: &Path,
    mode: EpisodeCountMode,
) -> Result<EpisodeCounts> {
    let mut counts = EpisodeCounts::new();
    for_each_record(reader, origin, |record: EpisodeRecord| {
        if mode == EpisodeCountMode::MainOnly && record.episode_type != MAIN_EPISODE_TYPE {
            return;
        }
        counts.increment(record.subject_id);
    })?;
    Ok(counts)
}

fn for_each_record<R, T, F>(reader: R, origin: &Path, mut on_record: F) -> Result<()>
where
    R: BufRead,
    T: DeserializeOwned,
    F: FnMut(T),
{
    let malformed = |line_number: usize, line: &str, source: serde_json::Error| {
        RelationsError::MalformedRecord {
            path: origin.to_path_buf(),
            line_number,
            line: line.to_string(),
            source,
        }
    };

    for (idx, bytes) in reader.split(b'\n').enumerate() {
        let bytes = bytes.map_err(|err| RelationsError::io(origin, err))?;
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(err) => {
                let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
                let source = <serde_json::Error as serde::de::Error>::custom(format!(
                    "line is not valid UTF-8: {}",
                    err.utf8_error()
                ));
                return Err(malformed(idx + 1, lossy.trim(), source));
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str::<T>(trimmed)
            .map_err(|source| malformed(idx + 1, trimmed, source))?;
        on_record(record);
    }
    Ok(())
}
