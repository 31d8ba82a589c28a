//! Query modes and output shaping.
//!
//! Each mode fetches the relevant slice of PBS state, reshapes it, and
//! produces a single JSON document. Datastores are always walked in
//! lexicographic store order and namespaces in lexicographic namespace
//! order, regardless of how the API returns them.

use crate::client::{DatastoreUsage, PbsClient, Snapshot, Task};
use crate::error::Result;
use chrono::DateTime;
use clap::ValueEnum;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Page size for the task listing.
pub const TASK_PAGE_LIMIT: u64 = 200;

/// The query mode selected with `--mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Datastore usage records
    Datastores,
    /// Backup groups with attached group notes, keyed by group name
    Groups,
    /// Snapshots with derived timestamps, keyed by group name
    Snapshots,
    /// Recent tasks of the local node
    Tasks,
}

impl Mode {
    /// Run the selected query and return its JSON document.
    pub async fn run(self, client: &PbsClient, exclude: &HashSet<String>) -> Result<Value> {
        match self {
            Mode::Datastores => datastores(client, exclude).await,
            Mode::Groups => groups(client, exclude).await,
            Mode::Snapshots => snapshots(client, exclude).await,
            Mode::Tasks => tasks(client).await,
        }
    }
}

/// Output key for a (store, namespace) pair: the bare store name for the
/// root namespace, `store/ns` otherwise.
pub fn group_name(store: &str, ns: &str) -> String {
    if ns.is_empty() {
        store.to_string()
    } else {
        format!("{store}/{ns}")
    }
}

/// Exclusion key for a (store, namespace) pair. The root namespace filters
/// as `store/_`, which differs from its output key.
pub fn filter_name(store: &str, ns: &str) -> String {
    if ns.is_empty() {
        format!("{store}/_")
    } else {
        format!("{store}/{ns}")
    }
}

fn format_utc(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

async fn sorted_datastores(
    client: &PbsClient,
    exclude: &HashSet<String>,
) -> Result<Vec<DatastoreUsage>> {
    let mut stores = client.datastore_usage().await?;
    stores.sort_by(|a, b| a.store.cmp(&b.store));
    stores.retain(|ds| !exclude.contains(&ds.store));
    Ok(stores)
}

async fn sorted_namespaces(
    client: &PbsClient,
    store: &str,
    exclude: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut namespaces = client.namespaces(store).await?;
    namespaces.sort_by(|a, b| a.ns.cmp(&b.ns));
    Ok(namespaces
        .into_iter()
        .map(|n| n.ns)
        .filter(|ns| !exclude.contains(&filter_name(store, ns)))
        .collect())
}

/// `--mode datastores`: usage records with the `history` field dropped.
pub async fn datastores(client: &PbsClient, exclude: &HashSet<String>) -> Result<Value> {
    let mut stores = sorted_datastores(client, exclude).await?;
    for ds in &mut stores {
        shape_datastore(ds);
    }
    Ok(serde_json::to_value(stores)?)
}

/// `--mode groups`: backup groups per (store, namespace), keyed by group
/// name, with group notes attached as `full-comment` when non-empty.
pub async fn groups(client: &PbsClient, exclude: &HashSet<String>) -> Result<Value> {
    let mut out = Map::new();
    for ds in sorted_datastores(client, exclude).await? {
        for ns in sorted_namespaces(client, &ds.store, exclude).await? {
            let mut ds_groups = client.groups(&ds.store, &ns).await?;
            for group in &mut ds_groups {
                let notes = client
                    .group_notes(&ds.store, &group.backup_id, &group.backup_type)
                    .await?;
                if !notes.is_empty() {
                    group.full_comment = Some(notes);
                }
            }
            out.insert(group_name(&ds.store, &ns), serde_json::to_value(ds_groups)?);
        }
    }
    Ok(Value::Object(out))
}

/// `--mode snapshots`: snapshots per (store, namespace), keyed by group
/// name, with derived timestamps and noise fields stripped.
pub async fn snapshots(client: &PbsClient, exclude: &HashSet<String>) -> Result<Value> {
    let mut out = Map::new();
    for ds in sorted_datastores(client, exclude).await? {
        for ns in sorted_namespaces(client, &ds.store, exclude).await? {
            let mut ds_snapshots = client.snapshots(&ds.store, &ns).await?;
            for snapshot in &mut ds_snapshots {
                shape_snapshot(snapshot);
            }
            out.insert(
                group_name(&ds.store, &ns),
                serde_json::to_value(ds_snapshots)?,
            );
        }
    }
    Ok(Value::Object(out))
}

/// `--mode tasks`: recent tasks of the local node with derived timestamps;
/// tasks still running get an explicit `RUNNING` status.
pub async fn tasks(client: &PbsClient) -> Result<Value> {
    let mut tasks = client.tasks(TASK_PAGE_LIMIT).await?;
    for task in &mut tasks {
        shape_task(task);
    }
    Ok(serde_json::to_value(tasks)?)
}

fn shape_datastore(ds: &mut DatastoreUsage) {
    ds.extra.remove("history");
}

fn shape_snapshot(snapshot: &mut Snapshot) {
    snapshot.backup_time_str = Some(format_utc(snapshot.backup_time));
    snapshot.extra.remove("fingerprint");
    snapshot.extra.remove("files");
    if let Some(verification) = snapshot.verification.as_mut() {
        verification.remove("upid");
    }
}

fn shape_task(task: &mut Task) {
    task.starttime_str = Some(format_utc(task.starttime));
    if task.status.is_none() {
        task.status = Some("RUNNING".to_string());
    }
}
