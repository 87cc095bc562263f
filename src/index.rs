//! In-memory HNSW index over chunk embeddings.
//!
//! The graph lives entirely in memory and is rebuilt at startup from the
//! `chunk_vectors` table, which is the durable record. Inserts are
//! append-only; version promotion keeps archived chunks in the graph as
//! routing waypoints and flips a per-node activity flag instead, mirroring
//! `chunks.is_active` at a cost proportional to the affected document, not
//! the corpus. A [`parking_lot::RwLock`] lets searches proceed concurrently
//! while ingestion appends.
//!
//! Level assignment is derived from a hash of the chunk id instead of a
//! random draw, so a rebuild of the same rows produces the same graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use anyhow::Result;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::config::IndexConfig;
use crate::embedding::{blob_to_vec, cosine_distance};

const MAX_LEVEL: usize = 16;

struct Node {
    chunk_id: i64,
    vector: Vec<f32>,
    level: usize,
    /// Eligible for search results; mirrors `chunks.is_active`.
    active: bool,
    /// One adjacency list per layer, `0..=level`.
    neighbors: Vec<Vec<usize>>,
}

#[derive(Default)]
struct Graph {
    nodes: Vec<Node>,
    by_chunk: HashMap<i64, usize>,
    entry: Option<usize>,
    max_level: usize,
}

pub struct VectorIndex {
    inner: RwLock<Graph>,
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    dims: usize,
}

/// Distance-ordered heap entry; ties break on node index for determinism.
#[derive(PartialEq)]
struct DistEntry {
    dist: f32,
    idx: usize,
}

impl Eq for DistEntry {}

impl Ord for DistEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for DistEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl VectorIndex {
    pub fn new(config: &IndexConfig, dims: usize) -> Self {
        Self {
            inner: RwLock::new(Graph::default()),
            m: config.m,
            m0: config.m * 2,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            dims,
        }
    }

    /// Rebuild the index from the durable vector log.
    ///
    /// Rows are replayed in chunk id order with activity restored from
    /// `chunks.is_active`; rows whose dimensionality does not match the
    /// configured provider are skipped with a warning (they belong to a
    /// previous embedding configuration).
    pub async fn load(pool: &SqlitePool, config: &IndexConfig, dims: usize) -> Result<Self> {
        let index = Self::new(config, dims);
        let rows = sqlx::query_as::<_, (i64, Vec<u8>, i64, bool)>(
            "SELECT cv.chunk_id, cv.embedding, cv.dims, c.is_active
             FROM chunk_vectors cv
             JOIN chunks c ON c.id = cv.chunk_id
             ORDER BY cv.chunk_id",
        )
        .fetch_all(pool)
        .await?;

        let total = rows.len();
        for (chunk_id, blob, row_dims, is_active) in rows {
            if row_dims as usize != dims {
                tracing::warn!(
                    chunk_id,
                    stored = row_dims,
                    expected = dims,
                    "skipping vector with mismatched dimensionality"
                );
                continue;
            }
            index.insert(chunk_id, blob_to_vec(&blob)?);
            if !is_active {
                index.set_active(chunk_id, false);
            }
        }
        tracing::debug!(total, indexed = index.len(), "vector index rebuilt");
        Ok(index)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: i64) -> bool {
        self.inner.read().by_chunk.contains_key(&chunk_id)
    }

    /// Mark a chunk eligible (or not) for search results. Unknown ids are
    /// ignored; the node stays in the graph either way.
    pub fn set_active(&self, chunk_id: i64, active: bool) {
        let mut g = self.inner.write();
        if let Some(&idx) = g.by_chunk.get(&chunk_id) {
            g.nodes[idx].active = active;
        }
    }

    /// [`Self::set_active`] for a batch of chunk ids under one lock.
    pub fn set_active_many(&self, chunk_ids: &[i64], active: bool) {
        let mut g = self.inner.write();
        for chunk_id in chunk_ids {
            if let Some(&idx) = g.by_chunk.get(chunk_id) {
                g.nodes[idx].active = active;
            }
        }
    }

    /// Append one vector. Re-inserting an already-indexed chunk id is a no-op.
    pub fn insert(&self, chunk_id: i64, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dims);
        let mut g = self.inner.write();
        if g.by_chunk.contains_key(&chunk_id) {
            return;
        }

        let level = assign_level(chunk_id, self.m);

        if g.entry.is_none() {
            let idx = g.nodes.len();
            g.nodes.push(Node {
                chunk_id,
                vector,
                level,
                active: true,
                neighbors: vec![Vec::new(); level + 1],
            });
            g.by_chunk.insert(chunk_id, idx);
            g.entry = Some(idx);
            g.max_level = level;
            return;
        }

        let query = vector.clone();
        let mut ep = g.entry.unwrap();
        let top = g.max_level;

        for layer in ((level + 1)..=top).rev() {
            ep = greedy_closest(&g, &query, ep, layer);
        }

        // Pick neighbors per layer before mutating the graph.
        let mut links: Vec<(usize, Vec<usize>)> = Vec::new();
        let mut entries = vec![ep];
        for layer in (0..=level.min(top)).rev() {
            let found = search_layer(&g, &query, &entries, layer, self.ef_construction);
            let cap = if layer == 0 { self.m0 } else { self.m };
            let selected: Vec<usize> = found.iter().take(cap).map(|e| e.idx).collect();
            entries = found.iter().map(|e| e.idx).collect();
            links.push((layer, selected));
        }

        let idx = g.nodes.len();
        g.nodes.push(Node {
            chunk_id,
            vector,
            level,
            active: true,
            neighbors: vec![Vec::new(); level + 1],
        });
        g.by_chunk.insert(chunk_id, idx);

        for (layer, selected) in links {
            for &n in &selected {
                g.nodes[n].neighbors[layer].push(idx);
                let cap = if layer == 0 { self.m0 } else { self.m };
                if g.nodes[n].neighbors[layer].len() > cap {
                    prune_neighbors(&mut g, n, layer, cap);
                }
            }
            g.nodes[idx].neighbors[layer] = selected;
        }

        if level > g.max_level {
            g.max_level = level;
            g.entry = Some(idx);
        }
    }

    /// Nearest active neighbors of `query`, as `(chunk_id, cosine_distance)`
    /// ordered by distance then chunk id.
    ///
    /// Inactive nodes still serve as routing waypoints during traversal;
    /// activity only gates what is returned, so `ef_search` should
    /// comfortably exceed `k` when many chunks are archived.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        let g = self.inner.read();
        let Some(mut ep) = g.entry else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        for layer in (1..=g.max_level).rev() {
            ep = greedy_closest(&g, query, ep, layer);
        }

        let ef = self.ef_search.max(k);
        let mut found = search_layer(&g, query, &[ep], 0, ef);
        found.sort_by(|a, b| {
            a.dist
                .total_cmp(&b.dist)
                .then(g.nodes[a.idx].chunk_id.cmp(&g.nodes[b.idx].chunk_id))
        });

        found
            .into_iter()
            .filter(|e| g.nodes[e.idx].active)
            .take(k)
            .map(|e| (g.nodes[e.idx].chunk_id, e.dist))
            .collect()
    }
}

/// Deterministic HNSW level draw from a hash of the chunk id.
fn assign_level(chunk_id: i64, m: usize) -> usize {
    let digest = Sha256::digest(chunk_id.to_le_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    // 53 high bits as a uniform draw in [0, 1).
    let u = ((u64::from_le_bytes(raw) >> 11) as f64) / ((1u64 << 53) as f64);
    let u = u.max(f64::MIN_POSITIVE);
    let ml = 1.0 / (m as f64).ln();
    ((-u.ln() * ml).floor() as usize).min(MAX_LEVEL)
}

fn greedy_closest(g: &Graph, query: &[f32], mut ep: usize, layer: usize) -> usize {
    let mut best = cosine_distance(query, &g.nodes[ep].vector);
    loop {
        let mut next = ep;
        for &n in &g.nodes[ep].neighbors[layer] {
            let d = cosine_distance(query, &g.nodes[n].vector);
            if d < best {
                best = d;
                next = n;
            }
        }
        if next == ep {
            return ep;
        }
        ep = next;
    }
}

/// Best-first expansion of one layer; returns up to `ef` nodes sorted by
/// ascending distance.
fn search_layer(
    g: &Graph,
    query: &[f32],
    entries: &[usize],
    layer: usize,
    ef: usize,
) -> Vec<DistEntry> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut candidates: BinaryHeap<Reverse<DistEntry>> = BinaryHeap::new();
    let mut results: BinaryHeap<DistEntry> = BinaryHeap::new();

    for &e in entries {
        if !visited.insert(e) {
            continue;
        }
        let d = cosine_distance(query, &g.nodes[e].vector);
        candidates.push(Reverse(DistEntry { dist: d, idx: e }));
        results.push(DistEntry { dist: d, idx: e });
    }
    while results.len() > ef {
        results.pop();
    }

    while let Some(Reverse(current)) = candidates.pop() {
        let worst = results.peek().map(|r| r.dist).unwrap_or(f32::INFINITY);
        if results.len() >= ef && current.dist > worst {
            break;
        }
        for &n in &g.nodes[current.idx].neighbors[layer] {
            if !visited.insert(n) {
                continue;
            }
            let d = cosine_distance(query, &g.nodes[n].vector);
            let worst = results.peek().map(|r| r.dist).unwrap_or(f32::INFINITY);
            if results.len() < ef || d < worst {
                candidates.push(Reverse(DistEntry { dist: d, idx: n }));
                results.push(DistEntry { dist: d, idx: n });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out = results.into_vec();
    out.sort();
    out
}

/// Keep the `cap` neighbors closest to the node, dropping the rest.
fn prune_neighbors(g: &mut Graph, node: usize, layer: usize, cap: usize) {
    let base = g.nodes[node].vector.clone();
    let mut scored: Vec<(f32, usize)> = g.nodes[node].neighbors[layer]
        .iter()
        .map(|&n| (cosine_distance(&base, &g.nodes[n].vector), n))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.truncate(cap);
    g.nodes[node].neighbors[layer] = scored.into_iter().map(|(_, n)| n).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> VectorIndex {
        let config = IndexConfig {
            m: 8,
            ef_construction: 100,
            ef_search: 64,
        };
        VectorIndex::new(&config, 8)
    }

    /// Deterministic pseudo-random unit-ish vector for a seed.
    fn pseudo_vec(seed: u64) -> Vec<f32> {
        let digest = Sha256::digest(seed.to_le_bytes());
        digest
            .chunks_exact(4)
            .map(|b| {
                let raw = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                (raw as f32 / u32::MAX as f32) - 0.5
            })
            .collect()
    }

    fn brute_force_top1(vectors: &[(i64, Vec<f32>)], query: &[f32]) -> i64 {
        let mut best = (f32::INFINITY, 0i64);
        for (id, v) in vectors {
            let d = cosine_distance(query, v);
            if d < best.0 || (d == best.0 && *id < best.1) {
                best = (d, *id);
            }
        }
        best.1
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = test_index();
        assert!(index.is_empty());
        assert!(index.search(&[0.0; 8], 5).is_empty());
    }

    #[test]
    fn top1_matches_brute_force() {
        let index = test_index();
        let vectors: Vec<(i64, Vec<f32>)> =
            (0..50).map(|i| (i as i64, pseudo_vec(i))).collect();
        for (id, v) in &vectors {
            index.insert(*id, v.clone());
        }
        assert_eq!(index.len(), 50);

        for q in 100..120u64 {
            let query = pseudo_vec(q);
            let results = index.search(&query, 1);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].0, brute_force_top1(&vectors, &query));
        }
    }

    #[test]
    fn deactivated_chunks_are_excluded_until_reactivated() {
        let index = test_index();
        for i in 0..20i64 {
            index.insert(i, pseudo_vec(i as u64));
        }
        let stale: Vec<i64> = (0..20i64).filter(|i| i % 2 == 1).collect();
        index.set_active_many(&stale, false);

        let query = pseudo_vec(3);
        let results = index.search(&query, 20);
        assert!(!results.is_empty());
        for (id, _) in &results {
            assert_eq!(id % 2, 0);
        }

        index.set_active_many(&stale, true);
        assert_eq!(index.search(&query, 20).len(), 20);
    }

    #[test]
    fn set_active_ignores_unknown_ids() {
        let index = test_index();
        index.insert(1, pseudo_vec(1));
        index.set_active(999, false);
        assert_eq!(index.search(&pseudo_vec(1), 5).len(), 1);
    }

    #[test]
    fn identical_vectors_tie_break_by_chunk_id() {
        let index = test_index();
        let v = pseudo_vec(7);
        for id in [42i64, 7, 99] {
            index.insert(id, v.clone());
        }
        let results = index.search(&v, 3);
        let ids: Vec<i64> = results.iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![7, 42, 99]);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let index = test_index();
        index.insert(1, pseudo_vec(1));
        index.insert(1, pseudo_vec(2));
        assert_eq!(index.len(), 1);
        assert!(index.contains(1));
    }

    #[test]
    fn results_ordered_by_distance() {
        let index = test_index();
        for i in 0..30i64 {
            index.insert(i, pseudo_vec(i as u64));
        }
        let query = pseudo_vec(500);
        let results = index.search(&query, 10);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}
