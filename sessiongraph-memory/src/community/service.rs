//! Snapshot, detect, merge and persist communities for a project

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::detect::{detect_communities, Communities, DetectOptions};
use super::merge::{merge_communities, DEFAULT_MERGE_THRESHOLD};
use super::summary::CommunitySummarizer;
use crate::entities::{Community, CommunityDraft, CommunityPatch, Entity};
use crate::error::Result;
use crate::versioned::VersionedStore;

/// What one refresh did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub project: String,
    pub reason: String,
    /// Keys of communities stored for the first time
    pub created: Vec<String>,
    /// Keys of communities that got a new version
    pub updated: Vec<String>,
    pub unchanged: usize,
    /// Keys whose generated summary failed validation; nothing was written
    pub rejected: Vec<String>,
}

pub struct CommunityService {
    entities: VersionedStore<Entity>,
    communities: VersionedStore<Community>,
    summarizer: Arc<dyn CommunitySummarizer>,
    detection: DetectOptions,
    merge_threshold: f64,
}

impl CommunityService {
    pub fn new(
        entities: VersionedStore<Entity>,
        communities: VersionedStore<Community>,
        summarizer: Arc<dyn CommunitySummarizer>,
    ) -> Self {
        Self {
            entities,
            communities,
            summarizer,
            detection: DetectOptions::default(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }

    pub fn with_detection(mut self, detection: DetectOptions) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: f64) -> Self {
        self.merge_threshold = threshold;
        self
    }

    /// Stored communities of `project` keyed by detection key, with their
    /// active members
    async fn load_existing(&self, project: &str) -> Result<(Communities, HashMap<String, Community>)> {
        let mut members = Communities::new();
        let mut by_key = HashMap::new();
        for community in self.communities.find_by_project(project).await? {
            members.insert(
                community.key.clone(),
                self.communities.members(&community.id).await?,
            );
            by_key.insert(community.key.clone(), community);
        }
        Ok((members, by_key))
    }

    /// Recompute the communities of `project`. Safe to call repeatedly; a
    /// second call over an unchanged graph writes nothing.
    pub async fn refresh(&self, project: &str, reason: &str) -> Result<RefreshReport> {
        log::info!("Refreshing communities for {} ({})", project, reason);
        let mut report = RefreshReport {
            project: project.to_string(),
            reason: reason.to_string(),
            ..Default::default()
        };

        let snapshot = self.entities.snapshot(project).await?;
        let detected = detect_communities(&snapshot, &self.detection);
        let (existing, mut stored) = self.load_existing(project).await?;
        let merged = merge_communities(&existing, &detected, self.merge_threshold);

        let entities: BTreeMap<String, Entity> = self
            .entities
            .find_by_project(project)
            .await?
            .into_iter()
            .map(|e| (e.id.to_string(), e))
            .collect();

        for (key, members) in merged {
            if existing.get(&key) == Some(&members) {
                report.unchanged += 1;
                continue;
            }

            let member_entities: Vec<Entity> = members
                .iter()
                .filter_map(|id| entities.get(id).cloned())
                .collect();
            let summary = match self.summarizer.summarize(&member_entities).await {
                Ok(summary) => summary,
                Err(e) => {
                    log::warn!("Summarizer failed for {}: {}", key, e);
                    report.rejected.push(key);
                    continue;
                }
            };
            if let Err(e) = summary.validate() {
                log::warn!("Rejected summary for {}: {}", key, e);
                report.rejected.push(key);
                continue;
            }

            let memory_count = self.communities.count_memories(&members).await?;
            let member_count = members.len() as u32;

            match stored.remove(&key) {
                Some(current) => {
                    let next = self
                        .communities
                        .update(
                            &current.id,
                            &CommunityPatch {
                                name: Some(summary.name),
                                summary: Some(summary.summary),
                                keywords: Some(summary.keywords),
                                member_count: Some(member_count),
                                memory_count: Some(memory_count),
                                embedding: None,
                            },
                        )
                        .await?;
                    self.communities
                        .relink_members(Some(&current.id), &next.id, &members)
                        .await?;
                    log::debug!("Community {} now {} with {} members", key, next.id, member_count);
                    report.updated.push(key);
                }
                None => {
                    let created = self
                        .communities
                        .create(
                            CommunityDraft {
                                project: project.to_string(),
                                key: key.clone(),
                                name: summary.name,
                                summary: summary.summary,
                                keywords: summary.keywords,
                                member_count,
                                memory_count,
                            },
                            None,
                        )
                        .await?;
                    self.communities
                        .relink_members(None, &created.id, &members)
                        .await?;
                    log::debug!("Community {} created as {}", key, created.id);
                    report.created.push(key);
                }
            }
        }

        log::info!(
            "Community refresh for {}: {} created, {} updated, {} unchanged, {} rejected",
            project,
            report.created.len(),
            report.updated.len(),
            report.unchanged,
            report.rejected.len()
        );
        Ok(report)
    }
}
