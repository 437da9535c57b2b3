use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;

use crate::models::{
    EpisodeCounts, IndexSnapshot, Relation, RelationKind, RelationTable, SubjectId,
    SubjectRelationIndex,
};

pub const DEFAULT_MIN_EPISODES: u32 = 8;

pub const CLOSURE_KINDS: [RelationKind; 3] = [
    RelationKind::Sequel,
    RelationKind::SideStory,
    RelationKind::Derived,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainFilter {
    /// A sequel below the threshold is never enqueued, so the walk does not
    /// continue past it.
    #[default]
    StopAtShort,
    /// Short sequels are walked through to reach their own sequels, but are
    /// left out of the chain.
    SkipShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub min_episodes: u32,
    pub chain_filter: ChainFilter,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            min_episodes: DEFAULT_MIN_EPISODES,
            chain_filter: ChainFilter::default(),
        }
    }
}

pub fn build_index(
    table: &RelationTable,
    episodes: &EpisodeCounts,
    options: IndexOptions,
) -> IndexSnapshot {
    Indexer::new(table, episodes, options).build()
}

pub struct Indexer<'a> {
    table: &'a RelationTable,
    episodes: &'a EpisodeCounts,
    options: IndexOptions,
    visited: HashSet<SubjectId>,
    queue: VecDeque<SubjectId>,
    stack: Vec<(SubjectId, usize)>,
    sequels: Vec<Relation>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        table: &'a RelationTable,
        episodes: &'a EpisodeCounts,
        options: IndexOptions,
    ) -> Self {
        Self {
            table,
            episodes,
            options,
            visited: HashSet::new(),
            queue: VecDeque::new(),
            stack: Vec::new(),
            sequels: Vec::new(),
        }
    }

    pub fn build(mut self) -> IndexSnapshot {
        let table = self.table;
        let mut entries = HashMap::new();

        for subject in table.subjects() {
            let related = self.collect_related(subject, &CLOSURE_KINDS);
            if related.is_empty() {
                continue;
            }
            let earliest = self.find_earliest(subject);
            let chain = self.build_chain(earliest);
            entries.insert(
                subject,
                SubjectRelationIndex {
                    series_main_subject_ids: chain.into_boxed_slice(),
                    sequel_subject_ids: related.into_boxed_slice(),
                },
            );
        }

        entries.shrink_to_fit();
        IndexSnapshot::new(entries, table.len(), Utc::now())
    }

    // Branching prequels resolve to the smallest subject id, not the declared
    // `order`.
    pub fn find_earliest(&mut self, subject: SubjectId) -> SubjectId {
        self.visited.clear();
        let mut current = subject;

        loop {
            self.visited.insert(current);
            let visited = &self.visited;
            let next = self
                .table
                .relations_of(current)
                .iter()
                .filter(|r| r.kind == RelationKind::Prequel)
                .map(|r| r.target)
                .filter(|target| !visited.contains(target))
                .min();

            match next {
                Some(prequel) => current = prequel,
                None => return current,
            }
        }
    }

    pub fn build_chain(&mut self, start: SubjectId) -> Vec<SubjectId> {
        let table = self.table;
        self.visited.clear();
        self.queue.clear();
        let mut chain = Vec::new();
        self.queue.push_back(start);

        while let Some(current) = self.queue.pop_front() {
            if !self.visited.insert(current) {
                continue;
            }
            if current == start || self.has_full_season(current) {
                chain.push(current);
            }

            self.sequels.clear();
            for relation in table.relations_of(current) {
                if relation.kind != RelationKind::Sequel {
                    continue;
                }
                if self.options.chain_filter == ChainFilter::StopAtShort
                    && !self.has_full_season(relation.target)
                {
                    continue;
                }
                self.sequels.push(*relation);
            }
            self.sequels.sort_by_key(|r| r.order);

            for sequel in &self.sequels {
                if !self.visited.contains(&sequel.target) {
                    self.queue.push_back(sequel.target);
                }
            }
        }

        chain.shrink_to_fit();
        chain
    }

    pub fn collect_related(
        &mut self,
        subject: SubjectId,
        allowed: &[RelationKind],
    ) -> Vec<SubjectId> {
        let table = self.table;
        self.visited.clear();
        self.stack.clear();
        let mut related = Vec::new();

        self.visited.insert(subject);
        self.stack.push((subject, 0));

        while let Some(frame) = self.stack.last_mut() {
            let relations = table.relations_of(frame.0);
            let mut next = None;
            while frame.1 < relations.len() {
                let relation = relations[frame.1];
                frame.1 += 1;
                if allowed.contains(&relation.kind) && !self.visited.contains(&relation.target) {
                    next = Some(relation.target);
                    break;
                }
            }

            match next {
                Some(target) => {
                    self.visited.insert(target);
                    related.push(target);
                    self.stack.push((target, 0));
                }
                None => {
                    self.stack.pop();
                }
            }
        }

        related.shrink_to_fit();
        related
    }

    fn has_full_season(&self, subject: SubjectId) -> bool {
        self.episodes.get(subject) >= self.options.min_episodes
    }
}
