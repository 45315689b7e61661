// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

/// This file contains the random topology generation.
/// Both the public network (all peers) and the overlay (colluders only) are
/// connected simple graphs whose node degrees are sampled uniformly from a
/// small range.
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Degree bounds for every node of a generated topology. Clamped down when
/// the graph is too small to support them.
pub const MIN_DEGREE: usize = 3;
pub const MAX_DEGREE: usize = 6;

/// How often a sampled degree sequence is re-paired before fresh degrees are
/// drawn.
const PAIRING_ATTEMPTS: usize = 32;

/// Build a connected random graph over `node_ids` with degrees in
/// `[MIN_DEGREE, MAX_DEGREE]`. Returns the edge list; fewer than two nodes
/// yield no edges. Degree sequences are resampled until a connected simple
/// graph materializes.
pub fn random_connected_graph<R: Rng>(node_ids: &[usize], rng: &mut R) -> Vec<(usize, usize)> {
    let n = node_ids.len();
    if n < 2 {
        return Vec::new();
    }
    let max_degree = MAX_DEGREE.min(n - 1);
    let min_degree = MIN_DEGREE.min(max_degree);

    loop {
        let degrees: Vec<usize> = (0..n)
            .map(|_| rng.gen_range(min_degree..=max_degree))
            .collect();
        if degrees.iter().sum::<usize>() % 2 != 0 {
            continue;
        }
        if let Some(edges) = pair_stubs(&degrees, rng) {
            if is_connected(n, &edges) {
                return edges
                    .into_iter()
                    .map(|(u, v)| (node_ids[u], node_ids[v]))
                    .collect();
            }
        }
    }
}

/// Configuration-model pairing: every node contributes one stub per unit of
/// degree, the stubs are shuffled and matched pairwise. A matching with a
/// self loop or a repeated edge is rejected and reshuffled.
fn pair_stubs<R: Rng>(degrees: &[usize], rng: &mut R) -> Option<Vec<(usize, usize)>> {
    let mut stubs: Vec<usize> = degrees
        .iter()
        .enumerate()
        .flat_map(|(node, &degree)| std::iter::repeat(node).take(degree))
        .collect();

    'attempt: for _ in 0..PAIRING_ATTEMPTS {
        stubs.shuffle(rng);

        let mut edges = Vec::with_capacity(stubs.len() / 2);
        let mut used = HashSet::new();
        for pair in stubs.chunks_exact(2) {
            let (u, v) = (pair[0], pair[1]);
            if u == v || !used.insert((u.min(v), u.max(v))) {
                continue 'attempt;
            }
            edges.push((u, v));
        }
        return Some(edges);
    }
    None
}

fn is_connected(n: usize, edges: &[(usize, usize)]) -> bool {
    let mut adjacency = vec![Vec::new(); n];
    for &(u, v) in edges {
        adjacency[u].push(v);
        adjacency[v].push(u);
    }

    let mut visited = vec![false; n];
    let mut stack = vec![0];
    visited[0] = true;
    while let Some(node) = stack.pop() {
        for &next in &adjacency[node] {
            if !visited[next] {
                visited[next] = true;
                stack.push(next);
            }
        }
    }
    visited.into_iter().all(|seen| seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn degrees_of(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
        let mut degrees = vec![0; n];
        for &(u, v) in edges {
            degrees[u] += 1;
            degrees[v] += 1;
        }
        degrees
    }

    #[test]
    fn generated_graph_is_connected_with_bounded_degrees() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let ids: Vec<usize> = (0..20).collect();
        let edges = random_connected_graph(&ids, &mut rng);

        assert!(is_connected(20, &edges));
        for degree in degrees_of(20, &edges) {
            assert!((MIN_DEGREE..=MAX_DEGREE).contains(&degree));
        }
        // Simple graph: no repeated edges, no self loops.
        let mut seen = HashSet::new();
        for &(u, v) in &edges {
            assert_ne!(u, v);
            assert!(seen.insert((u.min(v), u.max(v))));
        }
    }

    #[test]
    fn small_graphs_clamp_degrees() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let edges = random_connected_graph(&[4, 9], &mut rng);
        assert_eq!(edges.len(), 1);
        let (u, v) = edges[0];
        assert_eq!((u.min(v), u.max(v)), (4, 9));

        assert!(random_connected_graph(&[3], &mut rng).is_empty());
        assert!(random_connected_graph(&[], &mut rng).is_empty());
    }

    #[test]
    fn edges_use_the_given_node_ids() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let ids = [2, 5, 8, 11, 14];
        let edges = random_connected_graph(&ids, &mut rng);
        for &(u, v) in &edges {
            assert!(ids.contains(&u) && ids.contains(&v));
        }
    }

    #[test]
    fn same_seed_same_graph() {
        let ids: Vec<usize> = (0..12).collect();
        let mut rng_a = rand::rngs::StdRng::seed_from_u64(42);
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(42);
        assert_eq!(
            random_connected_graph(&ids, &mut rng_a),
            random_connected_graph(&ids, &mut rng_b)
        );
    }
}
