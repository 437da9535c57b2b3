use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::watch;
use tracing::info;

use crate::{
    archive::fetch_latest,
    config::Config,
    error::{RelationsError, Result},
    indexer::{build_index, IndexOptions},
    models::{IndexSnapshot, IndexStatus, SubjectId, SubjectRelationIndex, SubjectRelations},
    parser::{
        parse_episode_counts, parse_relations, EpisodeCountMode, EPISODES_FILE_NAME,
        RELATIONS_FILE_NAME,
    },
};

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub manifest_url: String,
    pub cache_dir: PathBuf,
    pub index_options: IndexOptions,
    pub episode_count_mode: EpisodeCountMode,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            manifest_url: config.manifest_url.clone(),
            cache_dir: config.cache_dir.clone(),
            index_options: config.index_options,
            episode_count_mode: config.episode_count_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub entries: usize,
    pub source_subjects: usize,
    pub elapsed: Duration,
}

// A failed refresh leaves the previous snapshot in place.
#[derive(Clone)]
pub struct RelationIndexService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    client: reqwest::Client,
    settings: RefreshSettings,
    current: watch::Sender<Option<Arc<IndexSnapshot>>>,
}

impl RelationIndexService {
    pub fn new(client: reqwest::Client, settings: RefreshSettings) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(ServiceInner {
                client,
                settings,
                current,
            }),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.inner.current.borrow().clone()
    }

    pub fn query(&self, subject_id: SubjectId) -> Option<SubjectRelationIndex> {
        self.snapshot()?.get(subject_id).cloned()
    }

    pub fn relations(&self, subject_id: SubjectId) -> SubjectRelations {
        let snapshot = self.snapshot();
        let index = snapshot.as_deref().and_then(|s| s.get(subject_id));
        SubjectRelations::from_index(subject_id, index)
    }

    pub fn status(&self) -> IndexStatus {
        match self.snapshot() {
            Some(snapshot) => IndexStatus {
                entries: snapshot.len(),
                source_subjects: snapshot.source_subjects,
                generated_at: Some(snapshot.generated_at),
            },
            None => IndexStatus {
                entries: 0,
                source_subjects: 0,
                generated_at: None,
            },
        }
    }

    pub fn publish(&self, snapshot: IndexSnapshot) {
        self.inner.current.send_replace(Some(Arc::new(snapshot)));
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<IndexSnapshot>>> {
        self.inner.current.subscribe()
    }

    pub async fn refresh_once(&self) -> Result<RefreshReport> {
        let started = Instant::now();
        let settings = &self.inner.settings;

        let dataset_dir =
            fetch_latest(&self.inner.client, &settings.manifest_url, &settings.cache_dir).await?;

        let mode = settings.episode_count_mode;
        let options = settings.index_options;
        let snapshot =
            tokio::task::spawn_blocking(move || load_snapshot(&dataset_dir, mode, options))
                .await
                .map_err(|err| RelationsError::Worker(format!("index build task: {err}")))??;

        let report = RefreshReport {
            entries: snapshot.len(),
            source_subjects: snapshot.source_subjects,
            elapsed: started.elapsed(),
        };
        self.publish(snapshot);
        info!(
            entries = report.entries,
            source_subjects = report.source_subjects,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Published subject relation index"
        );
        Ok(report)
    }
}

pub fn load_snapshot(
    dir: &Path,
    mode: EpisodeCountMode,
    options: IndexOptions,
) -> Result<IndexSnapshot> {
    let table = parse_relations(&dir.join(RELATIONS_FILE_NAME))?;
    let episodes = parse_episode_counts(&dir.join(EPISODES_FILE_NAME), mode)?;
    info!(
        subjects = table.len(),
        edges = table.edge_count(),
        episode_subjects = episodes.len(),
        "Parsed relation dataset"
    );

    let started = Instant::now();
    let snapshot = build_index(&table, &episodes, options);
    info!(
        entries = snapshot.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Built subject relation index"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
    };

    use chrono::Utc;

    use super::*;
    use crate::{
        archive::http_client,
        test_support::{dataset_zip, FixtureServer},
    };

    // Scenario fixture: 2 has prequel 1 and sequel 3; 4 is a short special.
    const RELATIONS_V1: &str = concat!(
        r#"{"subject_id":2,"relation_type":2,"related_subject_id":1,"order":0}"#,
        "\n",
        r#"{"subject_id":2,"relation_type":3,"related_subject_id":3,"order":0}"#,
        "\n",
        r#"{"subject_id":1,"relation_type":3,"related_subject_id":2,"order":0}"#,
        "\n",
        r#"{"subject_id":3,"relation_type":2,"related_subject_id":2,"order":0}"#,
        "\n",
        r#"{"subject_id":3,"relation_type":3,"related_subject_id":4,"order":0}"#,
        "\n",
        r#"{"subject_id":5,"relation_type":11,"related_subject_id":6,"order":0,"extra":true}"#,
        "\n",
    );

    const RELATIONS_V2: &str = concat!(
        r#"{"subject_id":7,"relation_type":6,"related_subject_id":8,"order":0}"#,
        "\n",
    );

    fn episodes(counts: &[(SubjectId, u32)]) -> String {
        let mut lines = String::new();
        let mut id = 0;
        for &(subject, count) in counts {
            for sort in 0..count {
                id += 1;
                lines.push_str(&format!(
                    "{{\"id\":{id},\"subject_id\":{subject},\"sort\":{},\"airdate\":\"\",\"type\":0}}\n",
                    sort + 1
                ));
            }
        }
        lines
    }

    fn service_for(server: &FixtureServer, cache_dir: &Path) -> RelationIndexService {
        RelationIndexService::new(
            http_client(Duration::from_secs(10)).unwrap(),
            RefreshSettings {
                manifest_url: server.manifest_url(),
                cache_dir: cache_dir.to_path_buf(),
                index_options: IndexOptions::default(),
                episode_count_mode: EpisodeCountMode::All,
            },
        )
    }

    fn ids(values: &[SubjectId]) -> Vec<SubjectId> {
        values.to_vec()
    }

    #[tokio::test]
    async fn queries_are_absent_before_first_refresh() {
        let server = FixtureServer::start(Vec::new()).await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());

        assert!(service.snapshot().is_none());
        assert!(service.query(2).is_none());
        assert_eq!(service.relations(2), SubjectRelations::from_index(2, None));
        assert!(service.status().generated_at.is_none());
    }

    #[tokio::test]
    async fn refresh_once_publishes_a_complete_index() {
        let server = FixtureServer::start(dataset_zip(
            RELATIONS_V1,
            &episodes(&[(1, 12), (2, 12), (3, 10), (4, 3)]),
        ))
        .await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());

        let report = service.refresh_once().await.unwrap();

        assert_eq!(report.source_subjects, 4);
        let main = service.query(2).unwrap();
        assert_eq!(ids(&main.series_main_subject_ids), vec![1, 2, 3]);
        assert_eq!(ids(&main.sequel_subject_ids), vec![3, 4]);
        let derived = service.query(5).unwrap();
        assert_eq!(ids(&derived.sequel_subject_ids), vec![6]);
        assert_eq!(ids(&derived.series_main_subject_ids), vec![5]);
        assert!(service.query(4).is_none());

        let status = service.status();
        assert_eq!(status.entries, report.entries);
        assert!(status.generated_at.is_some());
    }

    #[tokio::test]
    async fn integrity_failure_keeps_previous_snapshot() {
        let server = FixtureServer::start(dataset_zip(
            RELATIONS_V1,
            &episodes(&[(1, 12), (2, 12), (3, 10)]),
        ))
        .await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());
        service.refresh_once().await.unwrap();
        let before = service.query(2).unwrap();
        let generated_at = service.status().generated_at;

        server.set_archive(vec![0u8; 990]);
        server.set_declared_size(Some(1000));
        let err = service.refresh_once().await.unwrap_err();

        assert!(matches!(
            err,
            RelationsError::Integrity {
                expected: 1000,
                actual: 990
            }
        ));
        assert_eq!(service.query(2).unwrap(), before);
        assert_eq!(service.status().generated_at, generated_at);
    }

    #[tokio::test]
    async fn malformed_dataset_publishes_nothing() {
        let relations = format!("{RELATIONS_V1}{{\"subject_id\":9}}\n");
        let server = FixtureServer::start(dataset_zip(&relations, &episodes(&[(2, 12)]))).await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());

        let err = service.refresh_once().await.unwrap_err();

        assert_eq!(err.stage(), "parse");
        assert!(service.snapshot().is_none());
    }

    #[tokio::test]
    async fn refresh_replaces_previous_snapshot() {
        let server = FixtureServer::start(dataset_zip(RELATIONS_V1, &episodes(&[(2, 12)]))).await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());
        let mut updates = service.subscribe();
        service.refresh_once().await.unwrap();
        assert!(updates.has_changed().unwrap());
        updates.mark_unchanged();

        server.set_archive(dataset_zip(RELATIONS_V2, ""));
        service.refresh_once().await.unwrap();

        assert!(updates.has_changed().unwrap());
        assert!(service.query(2).is_none());
        assert_eq!(ids(&service.query(7).unwrap().sequel_subject_ids), vec![8]);
    }

    fn generation_snapshot(generation: SubjectId) -> IndexSnapshot {
        let entries: HashMap<_, _> = (1..=50)
            .map(|subject| {
                (
                    subject,
                    SubjectRelationIndex {
                        series_main_subject_ids: vec![subject].into_boxed_slice(),
                        sequel_subject_ids: vec![1000 + generation].into_boxed_slice(),
                    },
                )
            })
            .collect();
        IndexSnapshot::new(entries, 50, Utc::now())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_mixed_snapshots() {
        let server = FixtureServer::start(Vec::new()).await;
        let cache = tempfile::tempdir().unwrap();
        let service = service_for(&server, cache.path());
        service.publish(generation_snapshot(0));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let mut reads = 0usize;
                    loop {
                        let snapshot = service.snapshot().unwrap();
                        let marker = snapshot.get(1).unwrap().sequel_subject_ids[0];
                        for subject in 1..=50 {
                            let entry = snapshot.get(subject).unwrap();
                            assert_eq!(entry.sequel_subject_ids[0], marker);
                        }
                        assert!(service.query(25).is_some());
                        reads += 1;
                        if done.load(Ordering::SeqCst) {
                            break reads;
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for generation in 1..=200 {
            service.publish(generation_snapshot(generation));
            tokio::task::yield_now().await;
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
        assert_eq!(service.query(1).unwrap().sequel_subject_ids[0], 1200);
    }
}
