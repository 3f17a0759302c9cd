//! Immutable snapshots: manifest + sidecar chunk files + out-of-band
//! memory content files.
//!
//! Layout under the data directory:
//! `snapshots/<id>/manifest.json`,
//! `snapshots/<id>/{nodes,edges,vectors}-<chunk>.bin`, and shared
//! `memory_contents/<uuid>.json` batches. Sidecar files are immutable
//! once referenced by a manifest.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::vector::VECTOR_DIMENSION;
use crate::types::{now_micros, Edge, EdgeKind, MemoraError, MemoraResult, Node, Vector, LABEL_SIZE};

/// Directory holding one subdirectory per snapshot.
pub const SNAPSHOTS_DIR: &str = "snapshots";
/// Shared directory for memory content batch files.
pub const MEMORY_CONTENTS_DIR: &str = "memory_contents";

/// Maximum records per sidecar chunk file.
const CHUNK_ELEMENTS: usize = 4096;
/// Maximum blobs per memory content batch file.
const CONTENT_BATCH_SIZE: usize = 256;

/// On-disk node record size: id + label.
const NODE_RECORD_SIZE: usize = 8 + LABEL_SIZE;
/// On-disk edge record size: from + to + kind.
const EDGE_RECORD_SIZE: usize = 8 + 8 + 1;
/// On-disk vector record size: id + dims.
const VECTOR_RECORD_SIZE: usize = 8 + VECTOR_DIMENSION * 4;

/// A sidecar chunk file reference inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFile {
    /// Path relative to the data directory.
    pub path: String,
    /// Number of fixed records in the file.
    pub count: u64,
}

/// One memory content blob, as stored in the batch files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlob {
    pub memory_id: u64,
    pub content: String,
}

/// The immutable snapshot manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: u64,
    /// Unix epoch microseconds.
    pub created_at: u64,
    pub node_count: u64,
    pub edge_count: u64,
    pub vector_count: u64,
    pub node_files: Vec<ChunkFile>,
    pub edge_files: Vec<ChunkFile>,
    pub vector_files: Vec<ChunkFile>,
    /// Content batch files, relative to the data directory.
    pub memory_content_files: Vec<String>,
    /// Replay the log strictly after this sequence number.
    pub log_cursor: u64,
}

/// Writes and reads snapshots under a base data directory.
pub struct SnapshotManager {
    base_dir: PathBuf,
}

impl SnapshotManager {
    /// Create a manager rooted at the data directory, creating the
    /// snapshot and content directories when absent.
    pub fn open(base_dir: &Path) -> MemoraResult<Self> {
        fs::create_dir_all(base_dir.join(SNAPSHOTS_DIR))?;
        fs::create_dir_all(base_dir.join(MEMORY_CONTENTS_DIR))?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    /// Ascending list of snapshot ids present on disk.
    pub fn list_snapshots(&self) -> MemoraResult<Vec<u64>> {
        let mut ids = Vec::new();
        for dir_entry in fs::read_dir(self.base_dir.join(SNAPSHOTS_DIR))? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = dir_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Write a new snapshot. The id is one past the highest existing
    /// id; the records passed in must already be in a deterministic
    /// order (the facade sorts by id).
    pub fn create_snapshot(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        vectors: &[Vector],
        contents: &[ContentBlob],
        log_cursor: u64,
    ) -> MemoraResult<SnapshotManifest> {
        let snapshot_id = self.list_snapshots()?.last().map(|id| id + 1).unwrap_or(1);
        let snapshot_dir = self.snapshot_dir(snapshot_id);
        if snapshot_dir.exists() {
            return Err(MemoraError::SnapshotExists(snapshot_id));
        }
        fs::create_dir_all(&snapshot_dir)?;

        let node_files = self.write_chunks(snapshot_id, "nodes", nodes, encode_node)?;
        let edge_files = self.write_chunks(snapshot_id, "edges", edges, encode_edge)?;
        let vector_files = self.write_chunks(snapshot_id, "vectors", vectors, encode_vector)?;
        let memory_content_files = self.write_content_batches(contents)?;

        let manifest = SnapshotManifest {
            snapshot_id,
            created_at: now_micros(),
            node_count: nodes.len() as u64,
            edge_count: edges.len() as u64,
            vector_count: vectors.len() as u64,
            node_files,
            edge_files,
            vector_files,
            memory_content_files,
            log_cursor,
        };

        // Manifest lands last, atomically: a crash before the rename
        // leaves sidecars orphaned but never a partial manifest.
        let tmp_path = snapshot_dir.join("manifest.json.tmp");
        let final_path = snapshot_dir.join("manifest.json");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&manifest)?)?;
        fs::rename(&tmp_path, &final_path)?;

        log::info!(
            "snapshot {snapshot_id} written: {} nodes, {} edges, {} vectors, cursor {log_cursor}",
            manifest.node_count,
            manifest.edge_count,
            manifest.vector_count
        );
        Ok(manifest)
    }

    /// Load one manifest by id.
    pub fn load_snapshot(&self, snapshot_id: u64) -> MemoraResult<SnapshotManifest> {
        let path = self.snapshot_dir(snapshot_id).join("manifest.json");
        if !path.exists() {
            return Err(MemoraError::SnapshotNotFound(snapshot_id));
        }
        let manifest: SnapshotManifest = serde_json::from_slice(&fs::read(&path)?)?;
        Ok(manifest)
    }

    /// Load the newest manifest that parses, skipping damaged ones
    /// with a warning. Returns None when no usable snapshot exists.
    pub fn load_latest(&self) -> MemoraResult<Option<SnapshotManifest>> {
        for id in self.list_snapshots()?.into_iter().rev() {
            match self.load_snapshot(id) {
                Ok(manifest) => return Ok(Some(manifest)),
                Err(err) => {
                    log::warn!("skipping unreadable snapshot {id}: {err}");
                }
            }
        }
        Ok(None)
    }

    /// Read all node records referenced by a manifest.
    pub fn load_nodes(&self, manifest: &SnapshotManifest) -> MemoraResult<Vec<Node>> {
        self.load_chunks(&manifest.node_files, NODE_RECORD_SIZE, decode_node)
    }

    /// Read all edge records referenced by a manifest.
    pub fn load_edges(&self, manifest: &SnapshotManifest) -> MemoraResult<Vec<Edge>> {
        self.load_chunks(&manifest.edge_files, EDGE_RECORD_SIZE, decode_edge)
    }

    /// Read all vector records referenced by a manifest.
    pub fn load_vectors(&self, manifest: &SnapshotManifest) -> MemoraResult<Vec<Vector>> {
        self.load_chunks(&manifest.vector_files, VECTOR_RECORD_SIZE, decode_vector)
    }

    /// Read every content blob referenced by a manifest.
    pub fn load_memory_contents(
        &self,
        manifest: &SnapshotManifest,
    ) -> MemoraResult<Vec<ContentBlob>> {
        let mut blobs = Vec::new();
        for rel_path in &manifest.memory_content_files {
            let path = self.base_dir.join(rel_path);
            if !path.exists() {
                return Err(MemoraError::Corruption {
                    offset: 0,
                    detail: format!("manifest references missing content file {rel_path}"),
                });
            }
            blobs.extend(self.read_memory_content_file(&path)?);
        }
        Ok(blobs)
    }

    /// Parse a single content batch file.
    pub fn read_memory_content_file(&self, path: &Path) -> MemoraResult<Vec<ContentBlob>> {
        let blobs: Vec<ContentBlob> = serde_json::from_slice(&fs::read(path)?)?;
        Ok(blobs)
    }

    /// Content files present on disk but referenced by no manifest —
    /// leftovers of a snapshot that crashed before its manifest rename.
    pub fn scan_orphan_content_files(
        &self,
        referenced: &HashSet<String>,
    ) -> MemoraResult<Vec<PathBuf>> {
        let mut orphans = Vec::new();
        for dir_entry in fs::read_dir(self.base_dir.join(MEMORY_CONTENTS_DIR))? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let name = match dir_entry.file_name().to_str() {
                Some(name) if name.ends_with(".json") => name.to_string(),
                _ => continue,
            };
            let rel = format!("{MEMORY_CONTENTS_DIR}/{name}");
            if !referenced.contains(&rel) {
                orphans.push(dir_entry.path());
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    fn snapshot_dir(&self, snapshot_id: u64) -> PathBuf {
        self.base_dir.join(SNAPSHOTS_DIR).join(snapshot_id.to_string())
    }

    fn write_chunks<T>(
        &self,
        snapshot_id: u64,
        stem: &str,
        records: &[T],
        encode: fn(&T, &mut Vec<u8>),
    ) -> MemoraResult<Vec<ChunkFile>> {
        let mut files = Vec::new();
        for (chunk_idx, chunk) in records.chunks(CHUNK_ELEMENTS).enumerate() {
            let mut buf = Vec::new();
            for record in chunk {
                encode(record, &mut buf);
            }
            let rel = format!("{SNAPSHOTS_DIR}/{snapshot_id}/{stem}-{chunk_idx}.bin");
            fs::write(self.base_dir.join(&rel), &buf)?;
            files.push(ChunkFile {
                path: rel,
                count: chunk.len() as u64,
            });
        }
        Ok(files)
    }

    fn load_chunks<T>(
        &self,
        files: &[ChunkFile],
        record_size: usize,
        decode: fn(&[u8]) -> MemoraResult<T>,
    ) -> MemoraResult<Vec<T>> {
        let mut records = Vec::new();
        for chunk in files {
            let path = self.base_dir.join(&chunk.path);
            if !path.exists() {
                return Err(MemoraError::Corruption {
                    offset: 0,
                    detail: format!("manifest references missing sidecar {}", chunk.path),
                });
            }
            let data = fs::read(&path)?;
            if data.len() != chunk.count as usize * record_size {
                return Err(MemoraError::Corruption {
                    offset: 0,
                    detail: format!(
                        "sidecar {} is {} bytes, expected {}",
                        chunk.path,
                        data.len(),
                        chunk.count as usize * record_size
                    ),
                });
            }
            for raw in data.chunks_exact(record_size) {
                records.push(decode(raw)?);
            }
        }
        Ok(records)
    }

    fn write_content_batches(&self, contents: &[ContentBlob]) -> MemoraResult<Vec<String>> {
        let mut files = Vec::new();
        for batch in contents.chunks(CONTENT_BATCH_SIZE) {
            let rel = format!("{MEMORY_CONTENTS_DIR}/{}.json", uuid::Uuid::new_v4());
            fs::write(self.base_dir.join(&rel), serde_json::to_vec(batch)?)?;
            files.push(rel);
        }
        Ok(files)
    }
}

fn encode_node(node: &Node, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&node.id.to_le_bytes());
    buf.extend_from_slice(&node.label);
}

fn decode_node(raw: &[u8]) -> MemoraResult<Node> {
    let id = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let mut label = [0u8; LABEL_SIZE];
    label.copy_from_slice(&raw[8..8 + LABEL_SIZE]);
    Ok(Node::from_raw(id, label))
}

fn encode_edge(edge: &Edge, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&edge.from.to_le_bytes());
    buf.extend_from_slice(&edge.to.to_le_bytes());
    buf.push(edge.kind as u8);
}

fn decode_edge(raw: &[u8]) -> MemoraResult<Edge> {
    let from = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let to = u64::from_le_bytes(raw[8..16].try_into().unwrap());
    let kind = EdgeKind::from_u8(raw[16]).ok_or_else(|| MemoraError::Corruption {
        offset: 0,
        detail: format!("unknown edge kind {} in sidecar", raw[16]),
    })?;
    Ok(Edge::new(from, to, kind))
}

fn encode_vector(vector: &Vector, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&vector.id.to_le_bytes());
    for d in &vector.dims {
        buf.extend_from_slice(&d.to_le_bytes());
    }
}

fn decode_vector(raw: &[u8]) -> MemoraResult<Vector> {
    let id = u64::from_le_bytes(raw[0..8].try_into().unwrap());
    let mut dims = [0.0f32; VECTOR_DIMENSION];
    for (i, d) in dims.iter_mut().enumerate() {
        let at = 8 + i * 4;
        *d = f32::from_le_bytes(raw[at..at + 4].try_into().unwrap());
    }
    Ok(Vector { id, dims })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit_vector(id: u64, axis: usize) -> Vector {
        let mut dims = [0.0f32; VECTOR_DIMENSION];
        dims[axis] = 1.0;
        Vector { id, dims }
    }

    fn sample_state() -> (Vec<Node>, Vec<Edge>, Vec<Vector>, Vec<ContentBlob>) {
        let nodes = vec![Node::with_label(1, "a"), Node::with_label(2, "b")];
        let edges = vec![Edge::new(1, 2, EdgeKind::Related)];
        let vectors = vec![unit_vector(1, 0), unit_vector(2, 1)];
        let contents = vec![ContentBlob {
            memory_id: 1,
            content: "remember this".to_string(),
        }];
        (nodes, edges, vectors, contents)
    }

    #[test]
    fn create_list_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let (nodes, edges, vectors, contents) = sample_state();

        let manifest = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 3)
            .unwrap();
        assert_eq!(manifest.snapshot_id, 1);
        assert_eq!(manifest.log_cursor, 3);
        assert_eq!(manager.list_snapshots().unwrap(), vec![1]);

        let loaded = manager.load_snapshot(1).unwrap();
        assert_eq!(loaded.node_count, 2);
        assert_eq!(manager.load_nodes(&loaded).unwrap(), nodes);
        assert_eq!(manager.load_edges(&loaded).unwrap(), edges);
        assert_eq!(manager.load_vectors(&loaded).unwrap(), vectors);
        assert_eq!(manager.load_memory_contents(&loaded).unwrap(), contents);
    }

    #[test]
    fn snapshot_ids_increase() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let (nodes, edges, vectors, contents) = sample_state();

        let first = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 3)
            .unwrap();
        let second = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 3)
            .unwrap();
        assert_eq!(first.snapshot_id, 1);
        assert_eq!(second.snapshot_id, 2);
        // Distinct manifests over equivalent state.
        assert_eq!(manager.list_snapshots().unwrap(), vec![1, 2]);
    }

    #[test]
    fn missing_sidecar_is_corruption() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let (nodes, edges, vectors, contents) = sample_state();
        let manifest = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 0)
            .unwrap();

        fs::remove_file(dir.path().join(&manifest.node_files[0].path)).unwrap();
        assert!(matches!(
            manager.load_nodes(&manifest),
            Err(MemoraError::Corruption { .. })
        ));
    }

    #[test]
    fn latest_falls_back_past_bad_manifest() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let (nodes, edges, vectors, contents) = sample_state();
        manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 1)
            .unwrap();
        let second = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 2)
            .unwrap();

        // Garble the newest manifest: load_latest must fall back.
        let manifest_path = dir
            .path()
            .join(SNAPSHOTS_DIR)
            .join(second.snapshot_id.to_string())
            .join("manifest.json");
        fs::write(&manifest_path, b"{ not json").unwrap();

        let latest = manager.load_latest().unwrap().unwrap();
        assert_eq!(latest.snapshot_id, 1);
    }

    #[test]
    fn orphan_content_files_detected() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let (nodes, edges, vectors, contents) = sample_state();
        let manifest = manager
            .create_snapshot(&nodes, &edges, &vectors, &contents, 0)
            .unwrap();

        // Drop an unreferenced batch file, as a crashed snapshot would.
        let orphan_blobs = vec![ContentBlob {
            memory_id: 9,
            content: "orphaned".to_string(),
        }];
        let orphan_path = dir
            .path()
            .join(MEMORY_CONTENTS_DIR)
            .join("deadbeef-0000-0000-0000-000000000000.json");
        fs::write(&orphan_path, serde_json::to_vec(&orphan_blobs).unwrap()).unwrap();

        let referenced: HashSet<String> =
            manifest.memory_content_files.iter().cloned().collect();
        let orphans = manager.scan_orphan_content_files(&referenced).unwrap();
        assert_eq!(orphans, vec![orphan_path.clone()]);
        assert_eq!(
            manager.read_memory_content_file(&orphan_path).unwrap(),
            orphan_blobs
        );
    }

    #[test]
    fn large_state_chunks() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).unwrap();
        let nodes: Vec<Node> = (1..=5000)
            .map(|id| Node::with_label(id, &format!("n{id}")))
            .collect();

        let manifest = manager
            .create_snapshot(&nodes, &[], &[], &[], 5000)
            .unwrap();
        assert_eq!(manifest.node_files.len(), 2);
        assert_eq!(manifest.node_files[0].count, 4096);
        assert_eq!(manifest.node_files[1].count, 904);
        assert_eq!(manager.load_nodes(&manifest).unwrap().len(), 5000);
    }
}
